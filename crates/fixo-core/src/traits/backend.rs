// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The three collaborators the session orchestrator talks to.
//!
//! Every operation names the acting [`Identity`] explicitly. The local
//! backend authorizes against it; the remote backend's server derives it
//! from the bearer token.

use async_trait::async_trait;

use crate::error::FixoError;
use crate::subscription::Subscription;
use crate::types::{
    Attachment, ConversationSummary, Identity, Message, NewMessage, NewSession, NewSignal,
    Session, SessionChange, SignalEnvelope,
};

/// Persisted session state machine (`waiting -> active -> ended`).
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Opens a session. Fails with `Conflict` if the student already has a
    /// non-ended one.
    async fn create_session(
        &self,
        caller: &Identity,
        request: NewSession,
    ) -> Result<Session, FixoError>;

    /// Binds the calling admin to a waiting session and activates it.
    async fn join_session(&self, caller: &Identity, session_id: &str)
    -> Result<Session, FixoError>;

    /// Ends a session. Ending an ended session returns it unchanged.
    async fn end_session(&self, caller: &Identity, session_id: &str) -> Result<Session, FixoError>;

    async fn get_session(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Option<Session>, FixoError>;

    /// Most recent non-ended session the caller takes part in.
    ///
    /// For admins this includes waiting sessions from the queue.
    async fn fetch_active(&self, caller: &Identity) -> Result<Option<Session>, FixoError>;

    /// Waiting sessions, oldest first. Admin only.
    async fn fetch_waiting(&self, caller: &Identity) -> Result<Vec<Session>, FixoError>;

    /// Sessions visible to the caller with unread counts, newest activity first.
    async fn list_conversations(
        &self,
        caller: &Identity,
    ) -> Result<Vec<ConversationSummary>, FixoError>;

    /// Pushes every committed change to sessions the caller takes part in.
    /// Admins also receive waiting sessions.
    async fn subscribe_sessions(
        &self,
        caller: &Identity,
    ) -> Result<Subscription<SessionChange>, FixoError>;
}

/// Ordered, persisted chat log scoped to one session.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Validates and persists a message. Returns once it is committed.
    async fn send_message(
        &self,
        caller: &Identity,
        message: NewMessage,
    ) -> Result<Message, FixoError>;

    /// Full history in `created_at` order.
    async fn fetch_messages(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Vec<Message>, FixoError>;

    async fn subscribe_messages(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Subscription<Message>, FixoError>;

    /// Sets the read receipt on one message. Returns `false` if it was
    /// already read or was the caller's own.
    async fn mark_read(&self, caller: &Identity, message_id: &str) -> Result<bool, FixoError>;

    /// Marks every unread message from the other side. Returns the count.
    async fn mark_session_read(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<u64, FixoError>;

    /// Stores an attachment under the session's namespace.
    async fn upload(
        &self,
        caller: &Identity,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment, FixoError>;

    /// Re-signs a stored attachment reference.
    async fn access_url(&self, caller: &Identity, path: &str) -> Result<String, FixoError>;
}

/// Append-only bus for offer/answer/ICE payloads.
#[async_trait]
pub trait SignalRelay: Send + Sync {
    async fn send_signal(
        &self,
        caller: &Identity,
        signal: NewSignal,
    ) -> Result<SignalEnvelope, FixoError>;

    /// Every envelope inserted for the session, including the caller's own.
    async fn subscribe_signals(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Subscription<SignalEnvelope>, FixoError>;
}

/// Convenience bound for a backend providing all three collaborators.
pub trait SupportBackend: SessionStore + MessageChannel + SignalRelay {}

impl<T: SessionStore + MessageChannel + SignalRelay> SupportBackend for T {}
