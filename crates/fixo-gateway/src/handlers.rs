// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.
//!
//! Every `/v1` handler receives the caller's [`Identity`] from the auth
//! middleware and forwards to the backend, which does its own
//! authorization against the session row.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use fixo_core::protocol::{
    AccessRequest, AccessResponse, ErrorBody, ReadCount, ReadUpdate, UploadRequest,
};
use fixo_core::{
    Attachment, BlobStore, ConversationSummary, FixoError, Identity, Message, NewMessage,
    NewSession, NewSignal, Session, SignalEnvelope,
};

use crate::server::GatewayState;

/// A backend error rendered as a JSON [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError(pub FixoError);

impl From<FixoError> for ApiError {
    fn from(err: FixoError) -> Self {
        Self(err)
    }
}

/// HTTP status for each error category.
pub fn status_for(err: &FixoError) -> StatusCode {
    match err {
        FixoError::Validation(_) => StatusCode::BAD_REQUEST,
        FixoError::Forbidden(_) => StatusCode::FORBIDDEN,
        FixoError::NotFound(_) => StatusCode::NOT_FOUND,
        FixoError::InvalidTransition { .. } | FixoError::Conflict(_) => StatusCode::CONFLICT,
        FixoError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /health (unauthenticated)
pub async fn get_public_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// POST /v1/sessions
pub async fn create_session(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Json(body): Json<NewSession>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.backend.create_session(&caller, body).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /v1/sessions/active
pub async fn get_active_session(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<Json<Option<Session>>> {
    Ok(Json(state.backend.fetch_active(&caller).await?))
}

/// GET /v1/sessions/waiting
pub async fn get_waiting_sessions(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<Json<Vec<Session>>> {
    Ok(Json(state.backend.fetch_waiting(&caller).await?))
}

/// GET /v1/sessions/{id}
pub async fn get_session(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Option<Session>>> {
    Ok(Json(state.backend.get_session(&caller, &session_id).await?))
}

/// POST /v1/sessions/{id}/join
pub async fn join_session(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.backend.join_session(&caller, &session_id).await?))
}

/// POST /v1/sessions/{id}/end
pub async fn end_session(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.backend.end_session(&caller, &session_id).await?))
}

/// GET /v1/conversations
pub async fn list_conversations(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(state.backend.list_conversations(&caller).await?))
}

/// GET /v1/sessions/{id}/messages
pub async fn get_messages(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.backend.fetch_messages(&caller, &session_id).await?))
}

/// POST /v1/sessions/{id}/messages
///
/// The path decides the session; a `session_id` in the body is overridden.
pub async fn post_message(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
    Json(mut body): Json<NewMessage>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    body.session_id = session_id;
    let message = state.backend.send_message(&caller, body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /v1/sessions/{id}/read
pub async fn mark_session_read(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<ReadCount>> {
    let count = state.backend.mark_session_read(&caller, &session_id).await?;
    Ok(Json(ReadCount { count }))
}

/// POST /v1/messages/{id}/read
pub async fn mark_message_read(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(message_id): Path<String>,
) -> ApiResult<Json<ReadUpdate>> {
    let updated = state.backend.mark_read(&caller, &message_id).await?;
    Ok(Json(ReadUpdate { updated }))
}

/// POST /v1/sessions/{id}/files
pub async fn upload_file(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
    Json(body): Json<UploadRequest>,
) -> ApiResult<(StatusCode, Json<Attachment>)> {
    let bytes = STANDARD
        .decode(body.data.as_bytes())
        .map_err(|e| FixoError::Validation(format!("upload data is not valid base64: {e}")))?;
    let attachment = state
        .backend
        .upload(&caller, &session_id, &body.file_name, bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

/// POST /v1/files/access
pub async fn access_file(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Json(body): Json<AccessRequest>,
) -> ApiResult<Json<AccessResponse>> {
    let url = state.backend.access_url(&caller, &body.path).await?;
    Ok(Json(AccessResponse { url }))
}

/// POST /v1/sessions/{id}/signals
pub async fn post_signal(
    State(state): State<GatewayState>,
    Extension(caller): Extension<Identity>,
    Path(session_id): Path<String>,
    Json(mut body): Json<NewSignal>,
) -> ApiResult<(StatusCode, Json<SignalEnvelope>)> {
    body.session_id = session_id;
    let envelope = state.backend.send_signal(&caller, body).await?;
    Ok((StatusCode::CREATED, Json(envelope)))
}

/// Query string of a signed download link.
#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub expires: i64,
    pub sig: String,
}

/// GET /files/{*path}
///
/// Authorized by the link signature alone, so links work from any client.
pub async fn download_file(
    State(state): State<GatewayState>,
    Path(path): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Response> {
    state.files.verify(&path, query.expires, &query.sig)?;
    let bytes = state.files.download(&path).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type(&path)),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        bytes,
    )
        .into_response())
}

fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "video/ogg",
        "mov" => "video/quicktime",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixo_core::SessionStatus;

    #[test]
    fn statuses_follow_error_category() {
        assert_eq!(
            status_for(&FixoError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&FixoError::Forbidden("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&FixoError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&FixoError::InvalidTransition {
                session_id: "s".into(),
                from: SessionStatus::Ended,
                action: "join".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&FixoError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&FixoError::Timeout {
                duration: std::time::Duration::from_secs(1)
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&FixoError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type("s/1.PNG"), "image/png");
        assert_eq!(content_type("s/1.webm"), "video/webm");
        assert_eq!(content_type("s/1.bin"), "application/octet-stream");
        assert_eq!(content_type("s/noext"), "application/octet-stream");
    }
}
