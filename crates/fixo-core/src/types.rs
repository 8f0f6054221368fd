// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the session store, message channel, signaling
//! relay, and the peer connection layer.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// System message recorded when an admin picks up a waiting session.
pub const ADMIN_JOINED_TEXT: &str = "Admin has joined the chat";

/// System message recorded when either participant ends a session.
pub const SESSION_ENDED_TEXT: &str = "Chat session has ended";

/// Current UTC time as an ISO-8601 string with millisecond precision.
///
/// Every timestamp column uses this format so lexical order matches
/// chronological order.
pub fn now_iso() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Human-readable label stored in the `message` field of a file message.
pub fn file_label(file_name: &str) -> String {
    format!("Shared file: {file_name}")
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a [`crate::PluginAdapter`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Storage,
    Blob,
    Gateway,
}

/// Role claim attached to an authenticated identity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

/// An authenticated caller. The id is opaque and only compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn student(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Lifecycle state of a support session. `Ended` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Ended,
}

impl SessionStatus {
    /// Position in the forward-only lifecycle. A row never moves to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Waiting => 0,
            SessionStatus::Active => 1,
            SessionStatus::Ended => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionStatus::Ended
    }
}

/// One support conversation between a student and, once joined, an admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub student_id: String,
    pub admin_id: Option<String>,
    pub status: SessionStatus,
    pub complaint_id: Option<String>,
    /// The side that creates SDP offers for this session.
    pub initiator: Role,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub updated_at: String,
}

impl Session {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.student_id == user_id || self.admin_id.as_deref() == Some(user_id)
    }

    /// Which side of the session `user_id` is on, if any.
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if self.student_id == user_id {
            Some(Role::Student)
        } else if self.admin_id.as_deref() == Some(user_id) {
            Some(Role::Admin)
        } else {
            None
        }
    }

    /// The participant on the other side of `user_id`.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        match self.role_of(user_id)? {
            Role::Student => self.admin_id.as_deref(),
            Role::Admin => Some(&self.student_id),
        }
    }

    /// Checks the status/admin pairing rules and the ended timestamp.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            SessionStatus::Waiting if self.admin_id.is_some() => {
                Err(format!("waiting session {} has an admin", self.id))
            }
            SessionStatus::Active if self.admin_id.is_none() => {
                Err(format!("active session {} has no admin", self.id))
            }
            SessionStatus::Ended if self.ended_at.is_none() => {
                Err(format!("ended session {} has no ended_at", self.id))
            }
            _ => Ok(()),
        }
    }
}

/// Request to open a session.
///
/// Without `admin_id` the session enters the waiting queue; with it the
/// session starts active and bound to that admin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub student_id: String,
    #[serde(default)]
    pub admin_id: Option<String>,
    #[serde(default)]
    pub complaint_id: Option<String>,
}

impl NewSession {
    pub fn queued(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            ..Default::default()
        }
    }

    pub fn direct(student_id: impl Into<String>, admin_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            admin_id: Some(admin_id.into()),
            complaint_id: None,
        }
    }

    pub fn with_complaint(mut self, complaint_id: impl Into<String>) -> Self {
        self.complaint_id = Some(complaint_id.into());
        self
    }

    /// The negotiation initiator implied by the creation mode.
    pub fn initiator(&self) -> Role {
        if self.admin_id.is_some() {
            Role::Admin
        } else {
            Role::Student
        }
    }
}

/// Kind of row change pushed by the change feed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A committed change to a session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChange {
    pub kind: ChangeKind,
    pub session: Session,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageType {
    Text,
    File,
    System,
}

/// One chat entry. Append-only apart from the read receipt fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    pub message: String,
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub created_at: String,
    pub read_at: Option<String>,
    pub read_by: Option<String>,
}

/// Outbound chat entry. The sender is taken from the caller's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub message: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub file_url: Option<String>,
}

impl NewMessage {
    pub fn text(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            message_type: MessageType::Text,
            file_url: None,
        }
    }

    pub fn file(
        session_id: impl Into<String>,
        file_name: &str,
        file_url: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message: file_label(file_name),
            message_type: MessageType::File,
            file_url: Some(file_url.into()),
        }
    }

    /// Trims the text and checks the `file_url` pairing rule.
    ///
    /// Returns the normalized message; nothing is written on error.
    pub fn validate(mut self) -> Result<Self, crate::FixoError> {
        let trimmed = self.message.trim();
        if trimmed.is_empty() {
            return Err(crate::FixoError::Validation(
                "message must not be empty".into(),
            ));
        }
        if trimmed.len() != self.message.len() {
            self.message = trimmed.to_string();
        }
        match (self.message_type, self.file_url.as_deref()) {
            (MessageType::File, None) | (MessageType::File, Some("")) => Err(
                crate::FixoError::Validation("file messages require a file_url".into()),
            ),
            (MessageType::Text | MessageType::System, Some(_)) => Err(
                crate::FixoError::Validation(format!(
                    "{} messages must not carry a file_url",
                    self.message_type
                )),
            ),
            _ => Ok(self),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum SignalType {
    #[serde(rename = "offer")]
    #[strum(serialize = "offer")]
    Offer,
    #[serde(rename = "answer")]
    #[strum(serialize = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    #[strum(serialize = "ice-candidate")]
    IceCandidate,
    /// Sent by the answering side after it added senders; the initiator
    /// replies with a fresh offer.
    #[serde(rename = "renegotiate")]
    #[strum(serialize = "renegotiate")]
    Renegotiate,
}

/// One WebRTC negotiation message relayed between the two participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub id: String,
    pub session_id: String,
    pub sender_id: String,
    pub signal_type: SignalType,
    /// SDP blob or ICE candidate descriptor; opaque to the relay.
    pub signal_data: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSignal {
    pub session_id: String,
    pub signal_type: SignalType,
    pub signal_data: serde_json::Value,
}

/// Conversation list entry with the caller's unread count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session: Session,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: u64,
}

/// Presentation hint for a stored attachment, sniffed from its extension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
}

impl AttachmentKind {
    pub fn from_path(path: &str) -> Self {
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" => AttachmentKind::Image,
            "mp4" | "webm" | "ogg" | "mov" => AttachmentKind::Video,
            _ => AttachmentKind::File,
        }
    }
}

/// A blob stored for a file message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Store-relative reference, `{session_id}/{millis}.{ext}`.
    pub path: String,
    /// Signed, time-limited access URL.
    pub url: String,
    pub file_name: String,
    pub kind: AttachmentKind,
}
