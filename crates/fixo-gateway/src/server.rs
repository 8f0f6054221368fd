// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use fixo_config::model::GatewayConfig;
use fixo_core::{FixoError, SupportBackend};
use fixo_storage::FsBlobStore;

use crate::auth::{AuthConfig, TokenSigner, auth_middleware};
use crate::handlers;
use crate::ws;

/// Room for JSON framing around a base64 upload.
const UPLOAD_ENVELOPE_BYTES: usize = 4096;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub backend: Arc<dyn SupportBackend>,
    /// Serves signed `/files/{path}` links.
    pub files: Arc<FsBlobStore>,
    pub auth: AuthConfig,
    /// Decoded attachment limit; the request body limit is derived from it.
    pub max_upload_bytes: usize,
    /// Process start time for uptime calculation.
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(
        backend: Arc<dyn SupportBackend>,
        files: Arc<FsBlobStore>,
        config: &GatewayConfig,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            backend,
            files,
            auth: AuthConfig {
                signer: TokenSigner::from_config(config),
            },
            max_upload_bytes,
            start_time: Instant::now(),
        }
    }
}

/// Largest JSON body accepted by the upload route.
pub fn upload_body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes.div_ceil(3) * 4 + UPLOAD_ENVELOPE_BYTES
}

/// Build the gateway router.
///
/// - GET /health, GET /files/{*path} (public; files are link-signed)
/// - /v1/... session, message, file and signal routes (bearer token)
/// - GET /ws?token=... (auth during the handshake)
pub fn build_router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();
    let upload_limit = upload_body_limit(state.max_upload_bytes);

    let public_routes = Router::new()
        .route("/health", get(handlers::get_public_health))
        .route("/files/{*path}", get(handlers::download_file))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/sessions", post(handlers::create_session))
        .route("/v1/sessions/active", get(handlers::get_active_session))
        .route("/v1/sessions/waiting", get(handlers::get_waiting_sessions))
        .route("/v1/sessions/{id}", get(handlers::get_session))
        .route("/v1/sessions/{id}/join", post(handlers::join_session))
        .route("/v1/sessions/{id}/end", post(handlers::end_session))
        .route(
            "/v1/sessions/{id}/messages",
            get(handlers::get_messages).post(handlers::post_message),
        )
        .route("/v1/sessions/{id}/read", post(handlers::mark_session_read))
        .route(
            "/v1/sessions/{id}/files",
            post(handlers::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/v1/sessions/{id}/signals", post(handlers::post_signal))
        .route("/v1/conversations", get(handlers::list_conversations))
        .route("/v1/messages/{id}/read", post(handlers::mark_message_read))
        .route("/v1/files/access", post(handlers::access_file))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind to the configured host:port and serve until `cancel` fires.
pub async fn start_server(
    config: &GatewayConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), FixoError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| FixoError::Channel {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;
    serve(listener, state, cancel).await
}

/// Serve on an already bound listener until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), FixoError> {
    if state.auth.signer.is_none() {
        tracing::warn!("gateway.token_secret is not set; all /v1 and /ws requests will be rejected");
    }
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Gateway server listening on {addr}");
    }
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| FixoError::Channel {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;
    tracing::info!("gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_limit_covers_base64_growth() {
        assert_eq!(upload_body_limit(3), 4 + UPLOAD_ENVELOPE_BYTES);
        assert_eq!(upload_body_limit(4), 8 + UPLOAD_ENVELOPE_BYTES);
        let max = 10 * 1024 * 1024;
        assert!(upload_body_limit(max) > max * 4 / 3);
    }
}
