// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Fixo live support engine.

use strum::{Display, EnumString};
use thiserror::Error;

use crate::types::SessionStatus;

/// Why a media capture request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MediaErrorKind {
    /// The user (or platform policy) refused the capture prompt.
    PermissionDenied,
    /// The platform has no capture API for this kind of media.
    Unsupported,
    /// Anything else: device busy, track ended early, backend fault.
    Other,
}

/// The primary error type used across every Fixo crate boundary.
#[derive(Debug, Error)]
pub enum FixoError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, blob I/O).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Input rejected before any I/O took place.
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced row or blob does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A session state machine guard rejected the operation.
    #[error("cannot {action} session {session_id} while it is {from}")]
    InvalidTransition {
        session_id: String,
        from: SessionStatus,
        action: String,
    },

    /// Uniqueness rule violated (e.g. a second open session for one student).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The caller is not allowed to act on this resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Media capture failed; `kind` tells denial and lack of support apart.
    #[error("media error ({kind}): {message}")]
    Media {
        kind: MediaErrorKind,
        message: String,
    },

    /// Peer connection negotiation failed (wrong signaling state, bad SDP, ICE).
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Transport errors (gateway, remote client, change feed).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FixoError {
    /// Stable machine-readable code, used on the wire by the gateway.
    pub fn code(&self) -> &'static str {
        match self {
            FixoError::Config(_) => "config",
            FixoError::Storage { .. } => "storage",
            FixoError::Validation(_) => "validation",
            FixoError::NotFound(_) => "not_found",
            FixoError::InvalidTransition { .. } => "invalid_transition",
            FixoError::Conflict(_) => "conflict",
            FixoError::Forbidden(_) => "forbidden",
            FixoError::Media { .. } => "media",
            FixoError::Negotiation(_) => "negotiation",
            FixoError::Channel { .. } => "channel",
            FixoError::Timeout { .. } => "timeout",
            FixoError::Internal(_) => "internal",
        }
    }

    /// Shorthand for a channel error without an underlying source.
    pub fn channel(message: impl Into<String>) -> Self {
        FixoError::Channel {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for a media error.
    pub fn media(kind: MediaErrorKind, message: impl Into<String>) -> Self {
        FixoError::Media {
            kind,
            message: message.into(),
        }
    }
}
