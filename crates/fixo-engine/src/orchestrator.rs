// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client-side controller for one user's live support sessions.
//!
//! The orchestrator owns the authoritative [`OrchestratorState`] and
//! publishes it through a `watch` channel; the presentation layer only
//! reads. Session rows from the change feed are reconciled level-triggered:
//! a non-ended row the user takes part in becomes the active session, an
//! ended row clears it, and a row older (by status rank) than one already
//! seen is ignored. Notifications go to the [`DeviceBus`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use fixo_bus::{DeviceBus, DeviceEventKind, NoticeLevel};
use fixo_config::model::RtcConfig;
use fixo_core::types::SESSION_ENDED_TEXT;
use fixo_core::{
    ChangeKind, FixoError, Identity, MediaErrorKind, Message, NewMessage, NewSession, Session,
    SessionChange, SessionStatus, SignalRelay, SupportBackend, Subscription,
};
use fixo_rtc::{
    ConnectionState, MediaDevices, MediaStream, PeerConnectionFactory, PeerConnectionManager,
    RemoteStream, RtcEvent, RtcServices, UnsupportedMediaDevices,
};

/// Everything the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorState {
    pub identity: Identity,
    pub mounted: bool,
    pub active_session: Option<Session>,
    /// Waiting sessions, oldest first. Only filled for admins.
    pub waiting: Vec<Session>,
    /// History of the active session, in `created_at` order.
    pub messages: Vec<Message>,
    pub connection_state: ConnectionState,
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<RemoteStream>,
    pub screen_sharing: bool,
    pub audio_enabled: bool,
}

impl OrchestratorState {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            mounted: false,
            active_session: None,
            waiting: Vec::new(),
            messages: Vec::new(),
            connection_state: ConnectionState::New,
            local_stream: None,
            remote_stream: None,
            screen_sharing: false,
            audio_enabled: false,
        }
    }

    fn clear_call(&mut self) {
        self.connection_state = ConnectionState::New;
        self.local_stream = None;
        self.remote_stream = None;
        self.screen_sharing = false;
        self.audio_enabled = false;
    }
}

/// The open conversation: message subscription plus, once the session is
/// active, the call.
struct Conversation {
    session_id: String,
    peer: Option<Arc<PeerConnectionManager>>,
    tasks: Vec<AbortHandle>,
}

#[derive(Default)]
struct Control {
    feed: Option<AbortHandle>,
    conversation: Option<Conversation>,
    ranks: SessionRanks,
}

/// Finished sessions remembered to reject late rows.
const RETIRED_RANKS: usize = 32;

/// Highest status seen per session id.
///
/// Sessions that are over for this user (ended, deleted, or taken from the
/// queue by another admin) are retired. Only the last [`RETIRED_RANKS`] of
/// those are kept.
#[derive(Default)]
struct SessionRanks {
    live: HashMap<String, SessionStatus>,
    retired: VecDeque<(String, SessionStatus)>,
}

impl SessionRanks {
    fn get(&self, id: &str) -> Option<SessionStatus> {
        self.live.get(id).copied().or_else(|| {
            self.retired
                .iter()
                .find(|(retired, _)| retired == id)
                .map(|(_, status)| *status)
        })
    }

    fn record(&mut self, id: &str, status: SessionStatus) {
        self.retired.retain(|(retired, _)| retired != id);
        self.live.insert(id.to_string(), status);
    }

    /// Records `status` unless something is already known about `id`.
    fn seed(&mut self, id: &str, status: SessionStatus) {
        if self.get(id).is_none() {
            self.live.insert(id.to_string(), status);
        }
    }

    fn retire(&mut self, id: &str) {
        let Some(status) = self.live.remove(id) else {
            return;
        };
        self.retired.push_back((id.to_string(), status));
        while self.retired.len() > RETIRED_RANKS {
            self.retired.pop_front();
        }
    }

    fn clear(&mut self) {
        self.live.clear();
        self.retired.clear();
    }
}

struct Shared<B> {
    identity: Identity,
    backend: Arc<B>,
    rtc: RtcConfig,
    media: Arc<dyn MediaDevices>,
    factory: Arc<dyn PeerConnectionFactory>,
    device: DeviceBus,
    state: Arc<watch::Sender<OrchestratorState>>,
    control: Mutex<Control>,
}

pub struct OrchestratorBuilder<B> {
    identity: Identity,
    backend: Arc<B>,
    factory: Arc<dyn PeerConnectionFactory>,
    rtc: RtcConfig,
    media: Arc<dyn MediaDevices>,
    device: DeviceBus,
}

impl<B: SupportBackend + 'static> OrchestratorBuilder<B> {
    pub fn media(mut self, media: Arc<dyn MediaDevices>) -> Self {
        self.media = media;
        self
    }

    pub fn device_bus(mut self, device: DeviceBus) -> Self {
        self.device = device;
        self
    }

    pub fn rtc_config(mut self, rtc: RtcConfig) -> Self {
        self.rtc = rtc;
        self
    }

    pub fn build(self) -> SessionOrchestrator<B> {
        let (state, _) = watch::channel(OrchestratorState::new(self.identity.clone()));
        SessionOrchestrator {
            shared: Arc::new(Shared {
                identity: self.identity,
                backend: self.backend,
                rtc: self.rtc,
                media: self.media,
                factory: self.factory,
                device: self.device,
                state: Arc::new(state),
                control: Mutex::new(Control::default()),
            }),
        }
    }
}

pub struct SessionOrchestrator<B> {
    shared: Arc<Shared<B>>,
}

impl<B: SupportBackend + 'static> SessionOrchestrator<B> {
    /// Capture defaults to [`UnsupportedMediaDevices`] and notifications to
    /// a private [`DeviceBus`].
    pub fn builder(
        identity: Identity,
        backend: Arc<B>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> OrchestratorBuilder<B> {
        OrchestratorBuilder {
            identity,
            backend,
            factory,
            rtc: RtcConfig::default(),
            media: Arc::new(UnsupportedMediaDevices),
            device: DeviceBus::default(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    pub fn state(&self) -> OrchestratorState {
        self.shared.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<OrchestratorState> {
        self.shared.state.subscribe()
    }

    pub fn device_bus(&self) -> &DeviceBus {
        &self.shared.device
    }

    /// Loads the active session (and the queue, for admins) and starts
    /// following session changes. Mounting twice is a no-op.
    pub async fn mount(&self) -> Result<(), FixoError> {
        let shared = &self.shared;
        let mut control = shared.control.lock().await;
        if control.feed.is_some() {
            return Ok(());
        }
        let result = async {
            let feed = shared.backend.subscribe_sessions(&shared.identity).await?;
            shared.load(&mut control).await?;
            Ok::<_, FixoError>(feed)
        }
        .await;
        let feed = result.inspect_err(|e| shared.report("Could not load your sessions", e))?;

        let task = tokio::spawn(follow_sessions(Arc::downgrade(shared), feed));
        control.feed = Some(task.abort_handle());
        shared.state.send_modify(|s| s.mounted = true);
        info!(user_id = %shared.identity.user_id, "orchestrator mounted");
        Ok(())
    }

    /// Re-fetches everything. The recovery path for missed pushes.
    pub async fn refresh(&self) -> Result<(), FixoError> {
        let shared = &self.shared;
        let mut control = shared.control.lock().await;
        shared
            .load(&mut control)
            .await
            .inspect_err(|e| shared.report("Could not refresh", e))?;
        if let Some(session_id) = control.conversation.as_ref().map(|c| c.session_id.clone()) {
            let history = shared
                .backend
                .fetch_messages(&shared.identity, &session_id)
                .await
                .inspect_err(|e| shared.report("Could not refresh messages", e))?;
            for message in history {
                insert_message(&shared.state, message);
            }
        }
        Ok(())
    }

    /// Stops following changes and tears down the call. The session itself
    /// stays open.
    pub async fn unmount(&self) {
        let shared = &self.shared;
        let mut control = shared.control.lock().await;
        if let Some(feed) = control.feed.take() {
            feed.abort();
        }
        shared.close_conversation(&mut control).await;
        control.ranks.clear();
        shared
            .state
            .send_replace(OrchestratorState::new(shared.identity.clone()));
        info!(user_id = %shared.identity.user_id, "orchestrator unmounted");
    }

    /// Opens a session. Without `target_student` the caller (a student)
    /// joins the queue; with it the caller (an admin) starts a direct chat.
    pub async fn create_session(
        &self,
        complaint_id: Option<String>,
        target_student: Option<String>,
    ) -> Result<Session, FixoError> {
        let shared = &self.shared;
        let me = &shared.identity.user_id;
        let mut request = match target_student {
            Some(student) => NewSession::direct(student, me.clone()),
            None => NewSession::queued(me.clone()),
        };
        request.complaint_id = complaint_id;

        let session = shared
            .backend
            .create_session(&shared.identity, request)
            .await
            .inspect_err(|e| shared.report("Could not start a chat", e))?;
        let notice = match session.status {
            SessionStatus::Waiting => "Waiting for an admin to join",
            _ => "Chat started",
        };
        shared.apply_now(session.clone(), ChangeKind::Insert).await;
        shared.notify(NoticeLevel::Success, notice);
        Ok(session)
    }

    pub async fn join_session(&self, session_id: &str) -> Result<Session, FixoError> {
        let shared = &self.shared;
        let session = shared
            .backend
            .join_session(&shared.identity, session_id)
            .await
            .inspect_err(|e| shared.report("Could not join the session", e))?;
        shared.apply_now(session.clone(), ChangeKind::Update).await;
        shared.notify(NoticeLevel::Success, "Joined the chat");
        Ok(session)
    }

    /// Ends the active session.
    pub async fn end_session(&self) -> Result<Session, FixoError> {
        let shared = &self.shared;
        let session_id = shared.active_session_id()?;
        let session = shared
            .backend
            .end_session(&shared.identity, &session_id)
            .await
            .inspect_err(|e| shared.report("Could not end the session", e))?;
        shared.apply_now(session.clone(), ChangeKind::Update).await;
        Ok(session)
    }

    /// Sends a text message to the active session. It shows up in
    /// [`OrchestratorState::messages`] through the subscription.
    pub async fn send_message(&self, text: &str) -> Result<Message, FixoError> {
        let shared = &self.shared;
        let session_id = shared.active_session_id()?;
        let message = NewMessage::text(session_id, text).validate()?;
        shared
            .backend
            .send_message(&shared.identity, message)
            .await
            .inspect_err(|e| shared.report("Message not sent", e))
    }

    /// Uploads an attachment and posts a file message pointing at it.
    pub async fn upload_file(&self, file_name: &str, bytes: Vec<u8>) -> Result<Message, FixoError> {
        let shared = &self.shared;
        let session_id = shared.active_session_id()?;
        let attachment = shared
            .backend
            .upload(&shared.identity, &session_id, file_name, bytes)
            .await
            .inspect_err(|e| shared.report("Upload failed", e))?;
        let message = NewMessage::file(session_id, &attachment.file_name, attachment.path);
        shared
            .backend
            .send_message(&shared.identity, message)
            .await
            .inspect_err(|e| shared.report("Upload failed", e))
    }

    /// Signed link for a file message's `file_url`.
    pub async fn attachment_url(&self, path: &str) -> Result<String, FixoError> {
        let shared = &self.shared;
        shared.backend.access_url(&shared.identity, path).await
    }

    pub async fn start_screen_share(&self) -> Result<(), FixoError> {
        let shared = &self.shared;
        let peer = shared
            .peer()
            .await
            .inspect_err(|e| shared.report("Screen sharing failed", e))?;
        peer.start_screen_share()
            .await
            .inspect_err(|e| shared.report("Screen sharing failed", e))?;
        shared.notify(NoticeLevel::Info, "Screen sharing started");
        Ok(())
    }

    pub async fn stop_screen_share(&self) -> Result<(), FixoError> {
        let peer = self.shared.peer().await?;
        peer.stop_screen_share().await;
        Ok(())
    }

    /// Turns the microphone on or off. Returns whether it is now on.
    pub async fn toggle_audio(&self) -> Result<bool, FixoError> {
        let shared = &self.shared;
        let peer = shared
            .peer()
            .await
            .inspect_err(|e| shared.report("Microphone unavailable", e))?;
        peer.toggle_audio()
            .await
            .inspect_err(|e| shared.report("Microphone unavailable", e))
    }
}

impl<B: SupportBackend + 'static> Shared<B> {
    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.device.notify(level, message);
    }

    fn report(&self, context: &str, error: &FixoError) {
        warn!(user_id = %self.identity.user_id, error = %error, "{context}");
        self.notify(NoticeLevel::Error, format!("{context}: {}", describe(error)));
    }

    fn active_session_id(&self) -> Result<String, FixoError> {
        self.state
            .borrow()
            .active_session
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or_else(|| FixoError::NotFound("no active session".into()))
    }

    async fn peer(&self) -> Result<Arc<PeerConnectionManager>, FixoError> {
        self.control
            .lock()
            .await
            .conversation
            .as_ref()
            .and_then(|c| c.peer.clone())
            .ok_or_else(|| FixoError::Negotiation("no call is running for this session".into()))
    }

    /// Fetches the active session and, for admins, the queue.
    async fn load(self: &Arc<Self>, control: &mut Control) -> Result<(), FixoError> {
        let active = match self.backend.fetch_active(&self.identity).await? {
            // admins also see queued rows; look for one of their own instead
            Some(session) if !session.is_participant(&self.identity.user_id) => {
                self.own_open_session().await?
            }
            other => other,
        };
        if self.identity.is_admin() {
            let waiting = self.backend.fetch_waiting(&self.identity).await?;
            for session in &waiting {
                control.ranks.seed(&session.id, session.status);
            }
            self.state.send_modify(|s| s.waiting = waiting);
        }

        let current = self.state.borrow().active_session.clone();
        match (active, current) {
            (Some(session), _) => self.apply(control, ChangeKind::Update, session).await,
            // the active session went away while we were not looking
            (None, Some(current)) => {
                let latest = self
                    .backend
                    .get_session(&self.identity, &current.id)
                    .await?;
                match latest {
                    Some(session) => self.apply(control, ChangeKind::Update, session).await,
                    None => self.apply(control, ChangeKind::Delete, current).await,
                }
            }
            (None, None) => {}
        }
        Ok(())
    }

    async fn own_open_session(&self) -> Result<Option<Session>, FixoError> {
        let conversations = self.backend.list_conversations(&self.identity).await?;
        Ok(conversations
            .into_iter()
            .map(|c| c.session)
            .filter(|s| s.is_participant(&self.identity.user_id) && !s.status.is_terminal())
            .max_by(|a, b| a.created_at.cmp(&b.created_at)))
    }

    async fn apply_now(self: &Arc<Self>, session: Session, kind: ChangeKind) {
        let mut control = self.control.lock().await;
        self.apply(&mut control, kind, session).await;
    }

    /// Level-triggered reconciliation of one session row.
    async fn apply(self: &Arc<Self>, control: &mut Control, kind: ChangeKind, session: Session) {
        let previous = control.ranks.get(&session.id);
        if let Some(seen) = previous
            && session.status.rank() < seen.rank()
        {
            debug!(session_id = %session.id, status = %session.status, seen = %seen, "stale session row ignored");
            return;
        }
        control.ranks.record(&session.id, session.status);

        let deleted = kind == ChangeKind::Delete;
        let participant = session.is_participant(&self.identity.user_id);
        let finished = deleted
            || session.status.is_terminal()
            || (!participant && session.status != SessionStatus::Waiting);
        if finished {
            control.ranks.retire(&session.id);
        }

        if self.identity.is_admin() {
            let queued = !deleted && session.status == SessionStatus::Waiting && !participant;
            self.state.send_if_modified(|s| {
                let before = s.waiting.len();
                s.waiting.retain(|w| w.id != session.id);
                let removed = s.waiting.len() != before;
                if queued {
                    s.waiting.push(session.clone());
                    s.waiting.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                }
                removed || queued
            });
        }
        if !participant {
            return;
        }

        if previous != Some(session.status) {
            self.device.publish(
                DeviceEventKind::StatusChange,
                serde_json::json!({"session_id": session.id, "status": session.status}),
            );
        }

        let current = self
            .state
            .borrow()
            .active_session
            .as_ref()
            .map(|s| s.id.clone());
        let is_current = current.as_deref() == Some(session.id.as_str());

        if deleted || session.status.is_terminal() {
            if is_current {
                self.close_conversation(control).await;
                self.state.send_modify(|s| {
                    s.active_session = None;
                    s.messages.clear();
                });
                info!(session_id = %session.id, "active session closed");
                self.notify(NoticeLevel::Info, SESSION_ENDED_TEXT);
            }
            return;
        }

        if !is_current {
            self.close_conversation(control).await;
        }
        self.state
            .send_if_modified(|s| match &s.active_session {
                Some(current) if *current == session => false,
                _ => {
                    s.active_session = Some(session.clone());
                    true
                }
            });
        self.ensure_conversation(control, &session).await;
    }

    /// Opens the message log for `session` and, once it is active, the call.
    async fn ensure_conversation(self: &Arc<Self>, control: &mut Control, session: &Session) {
        if control.conversation.is_none() {
            match self.open_messages(session).await {
                Ok(conversation) => control.conversation = Some(conversation),
                Err(e) => {
                    self.report("Could not load the conversation", &e);
                    return;
                }
            }
        }
        let Some(conversation) = control.conversation.as_mut() else {
            return;
        };
        if session.status != SessionStatus::Active || conversation.peer.is_some() {
            return;
        }

        let is_initiator = session.initiator == self.identity.role;
        let relay: Arc<dyn SignalRelay> = self.backend.clone();
        let peer = Arc::new(PeerConnectionManager::new(
            session.id.clone(),
            self.identity.clone(),
            is_initiator,
            self.rtc.clone(),
            RtcServices {
                relay,
                media: Arc::clone(&self.media),
                factory: Arc::clone(&self.factory),
            },
        ));
        if let Err(e) = peer.initialize().await {
            self.report("Could not set up the call", &e);
            peer.cleanup().await;
            return;
        }
        conversation.tasks.push(
            tokio::spawn(mirror_snapshot(Arc::clone(&self.state), peer.watch())).abort_handle(),
        );
        conversation
            .tasks
            .push(tokio::spawn(relay_call_events(self.device.clone(), peer.events())).abort_handle());
        conversation.peer = Some(peer);
        info!(session_id = %session.id, initiator = is_initiator, "call ready");
    }

    async fn open_messages(self: &Arc<Self>, session: &Session) -> Result<Conversation, FixoError> {
        let subscription = self
            .backend
            .subscribe_messages(&self.identity, &session.id)
            .await?;
        let history = self
            .backend
            .fetch_messages(&self.identity, &session.id)
            .await?;
        self.state.send_modify(|s| s.messages.clear());
        for message in history {
            insert_message(&self.state, message);
        }
        if let Err(e) = self
            .backend
            .mark_session_read(&self.identity, &session.id)
            .await
        {
            debug!(session_id = %session.id, error = %e, "marking messages read failed");
        }

        let task = tokio::spawn(follow_messages(
            Arc::downgrade(self),
            session.id.clone(),
            subscription,
        ));
        Ok(Conversation {
            session_id: session.id.clone(),
            peer: None,
            tasks: vec![task.abort_handle()],
        })
    }

    async fn close_conversation(&self, control: &mut Control) {
        let Some(conversation) = control.conversation.take() else {
            return;
        };
        for task in conversation.tasks {
            task.abort();
        }
        if let Some(peer) = conversation.peer {
            peer.cleanup().await;
        }
        self.state.send_modify(|s| {
            s.messages.clear();
            s.clear_call();
        });
        debug!(session_id = %conversation.session_id, "conversation closed");
    }
}

/// Inserts `message` in `created_at` order unless its id is already present.
fn insert_message(state: &watch::Sender<OrchestratorState>, message: Message) -> bool {
    state.send_if_modified(|s| {
        let belongs = s
            .active_session
            .as_ref()
            .is_some_and(|a| a.id == message.session_id);
        if !belongs || s.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        let at = s
            .messages
            .iter()
            .position(|m| m.created_at > message.created_at)
            .unwrap_or(s.messages.len());
        s.messages.insert(at, message.clone());
        true
    })
}

fn describe(error: &FixoError) -> String {
    match error {
        FixoError::Media {
            kind: MediaErrorKind::PermissionDenied,
            ..
        } => "permission was denied".into(),
        FixoError::Media {
            kind: MediaErrorKind::Unsupported,
            ..
        } => "not supported on this device".into(),
        FixoError::Timeout { .. } => "no response in time".into(),
        other => other.to_string(),
    }
}

async fn follow_sessions<B: SupportBackend + 'static>(
    shared: Weak<Shared<B>>,
    mut feed: Subscription<SessionChange>,
) {
    while let Some(change) = feed.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let mut control = shared.control.lock().await;
        shared.apply(&mut control, change.kind, change.session).await;
    }
    debug!("session feed closed");
}

async fn follow_messages<B: SupportBackend + 'static>(
    shared: Weak<Shared<B>>,
    session_id: String,
    mut subscription: Subscription<Message>,
) {
    while let Some(message) = subscription.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let from_peer = message.sender_id != shared.identity.user_id && message.read_at.is_none();
        let message_id = message.id.clone();
        if insert_message(&shared.state, message)
            && from_peer
            && let Err(e) = shared.backend.mark_read(&shared.identity, &message_id).await
        {
            debug!(%session_id, %message_id, error = %e, "read receipt failed");
        }
    }
    debug!(%session_id, "message subscription closed");
}

async fn mirror_snapshot(
    state: Arc<watch::Sender<OrchestratorState>>,
    mut snapshots: watch::Receiver<fixo_rtc::PeerSnapshot>,
) {
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        state.send_modify(|s| {
            s.connection_state = snapshot.connection_state;
            s.local_stream = snapshot.local_stream;
            s.remote_stream = snapshot.remote_stream;
            s.screen_sharing = snapshot.screen_sharing;
            s.audio_enabled = snapshot.audio_enabled;
        });
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

async fn relay_call_events(device: DeviceBus, mut events: broadcast::Receiver<RtcEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match event {
            RtcEvent::ConnectionState(ConnectionState::Connected) => {
                device.notify(NoticeLevel::Success, "Call connected");
            }
            RtcEvent::ConnectionState(ConnectionState::Disconnected) => {
                device.notify(NoticeLevel::Warning, "Call connection lost");
            }
            RtcEvent::ConnectionState(ConnectionState::Failed) => {
                device.notify(NoticeLevel::Warning, "Call connection failed");
            }
            RtcEvent::IceRestart => {
                device.notify(NoticeLevel::Info, "Reconnecting the call");
            }
            RtcEvent::ScreenShareEnded => {
                device.notify(NoticeLevel::Info, "Screen sharing stopped");
            }
            RtcEvent::SignalFailed { message, .. } => {
                device.notify(NoticeLevel::Warning, format!("Call problem: {message}"));
            }
            RtcEvent::ConnectionState(_) | RtcEvent::RemoteTrack(_) => {}
        }
    }
}
