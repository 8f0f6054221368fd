// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`RemoteBackend`]: the session, message and signal traits over a gateway.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use fixo_config::model::ClientConfig;
use fixo_core::protocol::{
    AccessRequest, AccessResponse, ErrorBody, ReadCount, ReadUpdate, ServerFrame, Topic,
    UploadRequest,
};
use fixo_core::{
    Attachment, ConversationSummary, FixoError, Identity, Message, MessageChannel, NewMessage,
    NewSession, NewSignal, Role, Session, SessionChange, SessionStore, SignalEnvelope,
    SignalRelay, Subscription,
};

use crate::subscribe;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Claims {
    sub: String,
    role: Role,
}

/// Read the identity a token was issued for, without verifying it.
///
/// The gateway does the verification; this only tells the client who it is.
pub fn token_identity(token: &str) -> Result<Identity, FixoError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| FixoError::Config(format!("identity token is malformed: {e}")))?;
    Ok(Identity::new(data.claims.sub, data.claims.role))
}

/// Backend that forwards every call to a Fixo gateway.
///
/// The bearer token decides who the gateway acts for; callers passing
/// another identity are refused locally.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
    ws_url: String,
    token: String,
    identity: Identity,
}

impl RemoteBackend {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, FixoError> {
        let token = token.into();
        let identity = token_identity(&token)?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let ws_url = if let Some(rest) = base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(FixoError::Config(format!(
                "gateway url `{base_url}` must start with http:// or https://"
            )));
        };
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FixoError::Channel {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            base_url,
            ws_url,
            token,
            identity,
        })
    }

    /// Requires both `client.server_url` and `client.token`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, FixoError> {
        let url = config
            .server_url
            .as_deref()
            .ok_or_else(|| FixoError::Config("client.server_url is not set".into()))?;
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| FixoError::Config("client.token is not set".into()))?;
        Self::new(url, token)
    }

    /// The identity carried by the token.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn check_caller(&self, caller: &Identity) -> Result<(), FixoError> {
        if caller == &self.identity {
            Ok(())
        } else {
            Err(FixoError::Forbidden(format!(
                "token belongs to {}, not {}",
                self.identity.user_id, caller.user_id
            )))
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FixoError> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&(impl serde::Serialize + Sync)>,
    ) -> Result<T, FixoError> {
        let req = self.client.post(self.url(path));
        let req = match body {
            Some(body) => req.json(body),
            None => req,
        };
        self.send(req).await
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, FixoError> {
        let response = req
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| FixoError::Channel {
                message: format!("HTTP request failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| FixoError::Channel {
            message: format!("failed to read response body: {e}"),
            source: Some(Box::new(e)),
        })?;
        debug!(status = %status, "gateway response received");

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| FixoError::Channel {
                message: format!("failed to parse gateway response: {e}"),
                source: Some(Box::new(e)),
            });
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(FixoError::Forbidden(
                "gateway rejected the identity token".into(),
            ));
        }
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => Err(error.into_error()),
            Err(_) => Err(FixoError::channel(format!(
                "gateway returned {status}: {body}"
            ))),
        }
    }

    async fn subscribe<T: Send + 'static>(
        &self,
        topic: Topic,
        pick: fn(ServerFrame) -> Option<T>,
    ) -> Result<Subscription<T>, FixoError> {
        let url = format!("{}/ws?token={}", self.ws_url, self.token);
        subscribe::open(&url, topic, pick).await
    }
}

#[async_trait]
impl SessionStore for RemoteBackend {
    async fn create_session(
        &self,
        caller: &Identity,
        request: NewSession,
    ) -> Result<Session, FixoError> {
        self.check_caller(caller)?;
        self.post("/v1/sessions", Some(&request)).await
    }

    async fn join_session(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Session, FixoError> {
        self.check_caller(caller)?;
        self.post(&format!("/v1/sessions/{session_id}/join"), None::<&()>)
            .await
    }

    async fn end_session(&self, caller: &Identity, session_id: &str) -> Result<Session, FixoError> {
        self.check_caller(caller)?;
        self.post(&format!("/v1/sessions/{session_id}/end"), None::<&()>)
            .await
    }

    async fn get_session(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Option<Session>, FixoError> {
        self.check_caller(caller)?;
        self.get(&format!("/v1/sessions/{session_id}")).await
    }

    async fn fetch_active(&self, caller: &Identity) -> Result<Option<Session>, FixoError> {
        self.check_caller(caller)?;
        self.get("/v1/sessions/active").await
    }

    async fn fetch_waiting(&self, caller: &Identity) -> Result<Vec<Session>, FixoError> {
        self.check_caller(caller)?;
        self.get("/v1/sessions/waiting").await
    }

    async fn list_conversations(
        &self,
        caller: &Identity,
    ) -> Result<Vec<ConversationSummary>, FixoError> {
        self.check_caller(caller)?;
        self.get("/v1/conversations").await
    }

    async fn subscribe_sessions(
        &self,
        caller: &Identity,
    ) -> Result<Subscription<SessionChange>, FixoError> {
        self.check_caller(caller)?;
        self.subscribe(Topic::Sessions, |frame| match frame {
            ServerFrame::SessionChange(change) => Some(change),
            _ => None,
        })
        .await
    }
}

#[async_trait]
impl MessageChannel for RemoteBackend {
    async fn send_message(
        &self,
        caller: &Identity,
        message: NewMessage,
    ) -> Result<Message, FixoError> {
        self.check_caller(caller)?;
        // rejected locally so a blank line never costs a round trip
        let message = message.validate()?;
        let path = format!("/v1/sessions/{}/messages", message.session_id);
        self.post(&path, Some(&message)).await
    }

    async fn fetch_messages(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Vec<Message>, FixoError> {
        self.check_caller(caller)?;
        self.get(&format!("/v1/sessions/{session_id}/messages")).await
    }

    async fn subscribe_messages(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Subscription<Message>, FixoError> {
        self.check_caller(caller)?;
        let topic = Topic::Messages {
            session_id: session_id.to_string(),
        };
        self.subscribe(topic, |frame| match frame {
            ServerFrame::Message(message) => Some(message),
            _ => None,
        })
        .await
    }

    async fn mark_read(&self, caller: &Identity, message_id: &str) -> Result<bool, FixoError> {
        self.check_caller(caller)?;
        let update: ReadUpdate = self
            .post(&format!("/v1/messages/{message_id}/read"), None::<&()>)
            .await?;
        Ok(update.updated)
    }

    async fn mark_session_read(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<u64, FixoError> {
        self.check_caller(caller)?;
        let read: ReadCount = self
            .post(&format!("/v1/sessions/{session_id}/read"), None::<&()>)
            .await?;
        Ok(read.count)
    }

    async fn upload(
        &self,
        caller: &Identity,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment, FixoError> {
        self.check_caller(caller)?;
        let body = UploadRequest {
            file_name: file_name.to_string(),
            data: STANDARD.encode(bytes),
        };
        self.post(&format!("/v1/sessions/{session_id}/files"), Some(&body))
            .await
    }

    async fn access_url(&self, caller: &Identity, path: &str) -> Result<String, FixoError> {
        self.check_caller(caller)?;
        let body = AccessRequest {
            path: path.to_string(),
        };
        let access: AccessResponse = self.post("/v1/files/access", Some(&body)).await?;
        Ok(access.url)
    }
}

#[async_trait]
impl SignalRelay for RemoteBackend {
    async fn send_signal(
        &self,
        caller: &Identity,
        signal: NewSignal,
    ) -> Result<SignalEnvelope, FixoError> {
        self.check_caller(caller)?;
        let path = format!("/v1/sessions/{}/signals", signal.session_id);
        self.post(&path, Some(&signal)).await
    }

    async fn subscribe_signals(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Subscription<SignalEnvelope>, FixoError> {
        self.check_caller(caller)?;
        let topic = Topic::Signals {
            session_id: session_id.to_string(),
        };
        self.subscribe(topic, |frame| match frame {
            ServerFrame::Signal(envelope) => Some(envelope),
            _ => None,
        })
        .await
    }
}
