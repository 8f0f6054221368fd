// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types shared by the HTTP gateway and the remote client.
//!
//! Every live subscription is its own WebSocket. The client sends a single
//! [`ClientFrame::Subscribe`], the gateway acknowledges with
//! [`ServerFrame::Subscribed`] once the feed is attached, then pushes
//! data frames until either side closes.

use serde::{Deserialize, Serialize};

use crate::error::FixoError;
use crate::types::{Message, SessionChange, SessionStatus, SignalEnvelope};

/// A change stream a WebSocket can attach to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topic {
    Sessions,
    Messages { session_id: String },
    Signals { session_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topic: Topic },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed(Topic),
    SessionChange(SessionChange),
    Message(Message),
    Signal(SignalEnvelope),
    Error(ErrorBody),
}

/// JSON error payload. Carries enough to rebuild the typed error remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    /// Human readable rendering of the error.
    pub error: String,
    /// The variant's own message, without the category prefix.
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SessionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl From<&FixoError> for ErrorBody {
    fn from(err: &FixoError) -> Self {
        let mut body = ErrorBody {
            code: err.code().to_string(),
            error: err.to_string(),
            detail: String::new(),
            session_id: None,
            from: None,
            action: None,
        };
        body.detail = match err {
            FixoError::Config(m)
            | FixoError::Validation(m)
            | FixoError::NotFound(m)
            | FixoError::Conflict(m)
            | FixoError::Forbidden(m)
            | FixoError::Negotiation(m)
            | FixoError::Internal(m) => m.clone(),
            FixoError::Media { message, .. } => message.clone(),
            FixoError::Channel { message, .. } => message.clone(),
            FixoError::InvalidTransition {
                session_id,
                from,
                action,
            } => {
                body.session_id = Some(session_id.clone());
                body.from = Some(*from);
                body.action = Some(action.clone());
                String::new()
            }
            FixoError::Storage { .. } | FixoError::Timeout { .. } => body.error.clone(),
        };
        body
    }
}

impl ErrorBody {
    /// Rebuilds the closest typed error on the receiving side.
    ///
    /// Server-only failures (storage, internal) come back as `Internal` so
    /// callers can still tell them apart from transport problems.
    pub fn into_error(self) -> FixoError {
        let detail = if self.detail.is_empty() {
            self.error
        } else {
            self.detail
        };
        match self.code.as_str() {
            "validation" => FixoError::Validation(detail),
            "not_found" => FixoError::NotFound(detail),
            "conflict" => FixoError::Conflict(detail),
            "forbidden" => FixoError::Forbidden(detail),
            "negotiation" => FixoError::Negotiation(detail),
            "config" => FixoError::Config(detail),
            "timeout" => FixoError::Timeout {
                duration: std::time::Duration::ZERO,
            },
            "invalid_transition" => match (self.session_id, self.from, self.action) {
                (Some(session_id), Some(from), Some(action)) => FixoError::InvalidTransition {
                    session_id,
                    from,
                    action,
                },
                _ => FixoError::Internal(detail),
            },
            "channel" => FixoError::channel(detail),
            _ => FixoError::Internal(detail),
        }
    }
}

/// Upload body for `POST /v1/sessions/{id}/files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub file_name: String,
    /// File contents, standard base64.
    pub data: String,
}

/// Body for `POST /v1/files/access`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResponse {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCount {
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadUpdate {
    pub updated: bool,
}
