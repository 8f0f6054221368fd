// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process backend: SQLite store, change feed and blob store behind the
//! session, message and signal traits.
//!
//! Every operation authorizes the caller against the session row before
//! touching storage, and publishes to the feed only after the write has
//! committed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fixo_bus::{ChangeEvent, ChangeFeed};
use fixo_config::FixoConfig;
use fixo_core::{
    Attachment, AttachmentKind, BlobStore, ChangeKind, ConversationSummary, FixoError, Identity,
    Message, MessageChannel, MessageType, NewMessage, NewSession, NewSignal, Role, Session,
    SessionChange, SessionStatus, SessionStore, SignalEnvelope, SignalRelay, Subscription,
};
use fixo_storage::queries::{messages, sessions, signals};
use fixo_storage::{Database, EndOutcome, attachment_path};

/// Attempts at finding a free attachment path before giving up.
const UPLOAD_ATTEMPTS: i64 = 5;

#[derive(Clone)]
pub struct LocalBackend {
    db: Database,
    feed: ChangeFeed,
    blobs: Arc<dyn BlobStore>,
    max_upload_bytes: usize,
    purge_on_end: bool,
}

impl LocalBackend {
    pub fn new(
        db: Database,
        feed: ChangeFeed,
        blobs: Arc<dyn BlobStore>,
        config: &FixoConfig,
    ) -> Self {
        Self {
            db,
            feed,
            blobs,
            max_upload_bytes: config.blobs.max_upload_bytes,
            purge_on_end: config.signaling.purge_on_end,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    async fn load(&self, session_id: &str) -> Result<Session, FixoError> {
        sessions::get_session(&self.db, session_id)
            .await?
            .ok_or_else(|| FixoError::NotFound(format!("session {session_id}")))
    }

    /// The session, if `caller` may read it: participants, plus any admin
    /// while it is still in the queue.
    async fn visible(&self, caller: &Identity, session_id: &str) -> Result<Session, FixoError> {
        let session = self.load(session_id).await?;
        if can_view(&session, caller) {
            Ok(session)
        } else {
            Err(FixoError::Forbidden(format!(
                "{} is not part of session {session_id}",
                caller.user_id
            )))
        }
    }

    /// The session, if `caller` takes part in it and it has not ended.
    async fn writable(
        &self,
        caller: &Identity,
        session_id: &str,
        action: &str,
    ) -> Result<Session, FixoError> {
        let session = self.load(session_id).await?;
        if !session.is_participant(&caller.user_id) {
            return Err(FixoError::Forbidden(format!(
                "{} is not part of session {session_id}",
                caller.user_id
            )));
        }
        if session.status.is_terminal() {
            return Err(FixoError::InvalidTransition {
                session_id: session.id,
                from: session.status,
                action: action.to_string(),
            });
        }
        Ok(session)
    }

    fn publish_session(&self, kind: ChangeKind, session: &Session) {
        self.feed.publish(ChangeEvent::Session(SessionChange {
            kind,
            session: session.clone(),
        }));
    }

    fn publish_message(&self, message: &Message) {
        self.feed.publish(ChangeEvent::Message(message.clone()));
    }
}

fn can_view(session: &Session, caller: &Identity) -> bool {
    session.is_participant(&caller.user_id)
        || (caller.is_admin() && session.status == SessionStatus::Waiting)
}

fn authorize_create(caller: &Identity, request: &NewSession) -> Result<(), FixoError> {
    if request.student_id.trim().is_empty() {
        return Err(FixoError::Validation("student_id must not be empty".into()));
    }
    match (&request.admin_id, caller.role) {
        (None, Role::Student) if request.student_id == caller.user_id => Ok(()),
        (None, Role::Student) => Err(FixoError::Forbidden(
            "students can only open sessions for themselves".into(),
        )),
        (None, Role::Admin) => Err(FixoError::Validation(
            "admins must name the admin when opening a session directly".into(),
        )),
        (Some(admin), Role::Admin) if *admin == caller.user_id => Ok(()),
        (Some(_), Role::Admin) => Err(FixoError::Forbidden(
            "admins can only open sessions bound to themselves".into(),
        )),
        (Some(_), Role::Student) => Err(FixoError::Forbidden(
            "only admins can open a session directly".into(),
        )),
    }
}

#[async_trait]
impl SessionStore for LocalBackend {
    async fn create_session(
        &self,
        caller: &Identity,
        request: NewSession,
    ) -> Result<Session, FixoError> {
        authorize_create(caller, &request)?;
        let session = sessions::create_session(&self.db, request).await?;
        info!(
            session_id = %session.id,
            status = %session.status,
            initiator = %session.initiator,
            "session created"
        );
        self.publish_session(ChangeKind::Insert, &session);
        Ok(session)
    }

    async fn join_session(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Session, FixoError> {
        if !caller.is_admin() {
            return Err(FixoError::Forbidden("only admins can join sessions".into()));
        }
        let (session, notice) = sessions::join_session(&self.db, session_id, &caller.user_id).await?;
        info!(session_id, admin_id = %caller.user_id, "session joined");
        self.publish_session(ChangeKind::Update, &session);
        self.publish_message(&notice);
        Ok(session)
    }

    async fn end_session(&self, caller: &Identity, session_id: &str) -> Result<Session, FixoError> {
        let current = self.load(session_id).await?;
        let allowed = current.is_participant(&caller.user_id)
            || (caller.is_admin() && current.status == SessionStatus::Waiting);
        if !allowed {
            return Err(FixoError::Forbidden(format!(
                "{} cannot end session {session_id}",
                caller.user_id
            )));
        }

        match sessions::end_session(&self.db, session_id, &caller.user_id).await? {
            EndOutcome::Ended { session, notice } => {
                info!(session_id, actor = %caller.user_id, "session ended");
                self.publish_session(ChangeKind::Update, &session);
                self.publish_message(&notice);
                if self.purge_on_end {
                    match signals::purge_session_signals(&self.db, session_id).await {
                        Ok(removed) => debug!(session_id, removed, "signals purged"),
                        Err(e) => warn!(session_id, error = %e, "signal purge failed"),
                    }
                }
                Ok(session)
            }
            EndOutcome::AlreadyEnded(session) => {
                debug!(session_id, "session already ended");
                Ok(session)
            }
        }
    }

    async fn get_session(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Option<Session>, FixoError> {
        match sessions::get_session(&self.db, session_id).await? {
            Some(session) if !can_view(&session, caller) => Err(FixoError::Forbidden(format!(
                "{} is not part of session {session_id}",
                caller.user_id
            ))),
            other => Ok(other),
        }
    }

    async fn fetch_active(&self, caller: &Identity) -> Result<Option<Session>, FixoError> {
        sessions::fetch_active(&self.db, &caller.user_id, caller.role).await
    }

    async fn fetch_waiting(&self, caller: &Identity) -> Result<Vec<Session>, FixoError> {
        if !caller.is_admin() {
            return Err(FixoError::Forbidden("only admins can view the queue".into()));
        }
        sessions::fetch_waiting(&self.db).await
    }

    async fn list_conversations(
        &self,
        caller: &Identity,
    ) -> Result<Vec<ConversationSummary>, FixoError> {
        sessions::list_conversations(&self.db, &caller.user_id, caller.role).await
    }

    async fn subscribe_sessions(
        &self,
        caller: &Identity,
    ) -> Result<Subscription<SessionChange>, FixoError> {
        Ok(self.feed.sessions_for(caller))
    }
}

#[async_trait]
impl MessageChannel for LocalBackend {
    async fn send_message(
        &self,
        caller: &Identity,
        message: NewMessage,
    ) -> Result<Message, FixoError> {
        let message = message.validate()?;
        if message.message_type == MessageType::System {
            return Err(FixoError::Validation(
                "system messages are recorded by session transitions".into(),
            ));
        }
        self.writable(caller, &message.session_id, "send a message to")
            .await?;
        let stored = messages::insert_message(&self.db, &caller.user_id, message).await?;
        debug!(session_id = %stored.session_id, message_id = %stored.id, "message stored");
        self.publish_message(&stored);
        Ok(stored)
    }

    async fn fetch_messages(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Vec<Message>, FixoError> {
        self.visible(caller, session_id).await?;
        messages::get_messages(&self.db, session_id).await
    }

    async fn subscribe_messages(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Subscription<Message>, FixoError> {
        self.visible(caller, session_id).await?;
        Ok(self.feed.messages_for(session_id))
    }

    async fn mark_read(&self, caller: &Identity, message_id: &str) -> Result<bool, FixoError> {
        let message = messages::get_message(&self.db, message_id)
            .await?
            .ok_or_else(|| FixoError::NotFound(format!("message {message_id}")))?;
        self.visible(caller, &message.session_id).await?;
        messages::mark_read(&self.db, message_id, &caller.user_id).await
    }

    async fn mark_session_read(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<u64, FixoError> {
        self.visible(caller, session_id).await?;
        messages::mark_session_read(&self.db, session_id, &caller.user_id).await
    }

    async fn upload(
        &self,
        caller: &Identity,
        session_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Attachment, FixoError> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(FixoError::Validation("file name must not be empty".into()));
        }
        if bytes.is_empty() {
            return Err(FixoError::Validation(format!("{file_name} is empty")));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(FixoError::Validation(format!(
                "{file_name} is {} bytes, the limit is {}",
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        self.writable(caller, session_id, "upload to").await?;

        let started = chrono::Utc::now().timestamp_millis();
        let mut attempt = 0;
        let path = loop {
            let path = attachment_path(session_id, file_name, started + attempt)?;
            match self.blobs.upload(&path, bytes.clone()).await {
                Ok(()) => break path,
                Err(FixoError::Conflict(_)) if attempt + 1 < UPLOAD_ATTEMPTS => attempt += 1,
                Err(e) => return Err(e),
            }
        };
        let url = self.blobs.access_url(&path, None)?;
        info!(session_id, path = %path, bytes = bytes.len(), "attachment uploaded");
        Ok(Attachment {
            kind: AttachmentKind::from_path(file_name),
            file_name: file_name.to_string(),
            path,
            url,
        })
    }

    async fn access_url(&self, caller: &Identity, path: &str) -> Result<String, FixoError> {
        let session_id = path
            .split_once('/')
            .map(|(sid, _)| sid)
            .filter(|sid| !sid.is_empty())
            .ok_or_else(|| FixoError::Validation(format!("invalid attachment path `{path}`")))?;
        self.visible(caller, session_id).await?;
        self.blobs.access_url(path, None)
    }
}

#[async_trait]
impl SignalRelay for LocalBackend {
    async fn send_signal(
        &self,
        caller: &Identity,
        signal: NewSignal,
    ) -> Result<SignalEnvelope, FixoError> {
        self.writable(caller, &signal.session_id, "signal").await?;
        let envelope = signals::insert_signal(&self.db, &caller.user_id, signal).await?;
        debug!(
            session_id = %envelope.session_id,
            signal_type = %envelope.signal_type,
            "signal relayed"
        );
        self.feed.publish(ChangeEvent::Signal(envelope.clone()));
        Ok(envelope)
    }

    async fn subscribe_signals(
        &self,
        caller: &Identity,
        session_id: &str,
    ) -> Result<Subscription<SignalEnvelope>, FixoError> {
        let session = self.load(session_id).await?;
        if !session.is_participant(&caller.user_id) {
            return Err(FixoError::Forbidden(format!(
                "{} is not part of session {session_id}",
                caller.user_id
            )));
        }
        Ok(self.feed.signals_for(session_id))
    }
}
