// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session peer connection lifecycle.
//!
//! A [`PeerConnectionManager`] owns one peer connection for one mounted
//! session. It relays offer/answer/ICE payloads through a [`SignalRelay`],
//! attaches local capture to RTP senders and publishes a [`PeerSnapshot`]
//! for the UI. Only the session initiator ever creates offers; the other
//! side answers, and when it adds senders of its own it sends a
//! `renegotiate` request that the initiator turns into a fresh offer.
//! Every mount builds a fresh manager.

use std::future::Future;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use fixo_config::model::RtcConfig;
use fixo_core::{
    FixoError, Identity, MediaErrorKind, NewSignal, SignalEnvelope, SignalRelay, SignalType,
    Subscription,
};

use crate::media::{
    AudioConstraints, DisplayMediaOptions, DisplaySurface, MediaDevices, MediaKind, MediaStream,
    MediaTrack,
};
use crate::peer::{
    ConnectionState, IceCandidate, IceConnectionState, PeerConnection, PeerConnectionFactory,
    PeerEvent, RemoteStream, RemoteTrack, RtcConfiguration, SdpType, SenderId,
    SessionDescription, SignalingState,
};

/// What the UI renders for the call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerSnapshot {
    pub connection_state: ConnectionState,
    pub ice_connection_state: IceConnectionState,
    pub signaling_state: SignalingState,
    /// `None` while nothing is being captured.
    pub local_stream: Option<MediaStream>,
    pub remote_stream: Option<RemoteStream>,
    pub screen_sharing: bool,
    pub audio_enabled: bool,
}

/// Discrete call events, for notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcEvent {
    ConnectionState(ConnectionState),
    RemoteTrack(RemoteTrack),
    /// The local screen share stopped, by request or because capture ended.
    ScreenShareEnded,
    IceRestart,
    /// A signal could not be sent or applied. The call may still recover.
    SignalFailed {
        signal_type: SignalType,
        message: String,
    },
}

/// Collaborators a manager needs besides its session identity.
#[derive(Clone)]
pub struct RtcServices {
    pub relay: Arc<dyn SignalRelay>,
    pub media: Arc<dyn MediaDevices>,
    pub factory: Arc<dyn PeerConnectionFactory>,
}

struct SenderSlot {
    id: SenderId,
    kind: MediaKind,
    track: MediaTrack,
}

#[derive(Default)]
struct LocalMedia {
    stream: MediaStream,
    senders: Vec<SenderSlot>,
    screen_tracks: Vec<String>,
    mic_tracks: Vec<String>,
    screen_sharing: bool,
}

/// Remote candidates that arrived before any remote description.
#[derive(Default)]
struct RemoteSignals {
    described: bool,
    pending: Vec<IceCandidate>,
}

struct Inner {
    session_id: String,
    identity: Identity,
    is_initiator: bool,
    config: RtcConfig,
    services: RtcServices,
    pc: Mutex<Option<Arc<dyn PeerConnection>>>,
    negotiation: Mutex<()>,
    local: Mutex<LocalMedia>,
    snapshot: watch::Sender<PeerSnapshot>,
    events: broadcast::Sender<RtcEvent>,
    tasks: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
}

pub struct PeerConnectionManager {
    inner: Arc<Inner>,
}

impl PeerConnectionManager {
    pub fn new(
        session_id: impl Into<String>,
        identity: Identity,
        is_initiator: bool,
        config: RtcConfig,
        services: RtcServices,
    ) -> Self {
        let (snapshot, _) = watch::channel(PeerSnapshot::default());
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                session_id: session_id.into(),
                identity,
                is_initiator,
                config,
                services,
                pc: Mutex::new(None),
                negotiation: Mutex::new(()),
                local: Mutex::new(LocalMedia::default()),
                snapshot,
                events,
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn is_initiator(&self) -> bool {
        self.inner.is_initiator
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PeerSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<RtcEvent> {
        self.inner.events.subscribe()
    }

    /// Builds the peer connection and starts relaying signals.
    ///
    /// Calling it again on a live manager is a no-op.
    #[instrument(skip(self), fields(session_id = %self.inner.session_id))]
    pub async fn initialize(&self) -> Result<(), FixoError> {
        let inner = &self.inner;
        let _guard = inner.negotiation.lock().await;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(FixoError::Negotiation(
                "peer connection manager is closed".into(),
            ));
        }
        if inner.pc.lock().await.is_some() {
            return Ok(());
        }

        let signals = inner
            .services
            .relay
            .subscribe_signals(&inner.identity, &inner.session_id)
            .await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let config = RtcConfiguration {
            ice_servers: inner.config.ice_servers.clone(),
        };
        let pc = inner.services.factory.create(&config, tx).await?;
        let signaling_state = pc.signaling_state();
        *inner.pc.lock().await = Some(pc);

        let peer_events = tokio::spawn(run_peer_events(Arc::downgrade(inner), rx));
        let relay_events = tokio::spawn(run_signals(Arc::downgrade(inner), signals));
        inner
            .tasks
            .lock()
            .await
            .extend([peer_events.abort_handle(), relay_events.abort_handle()]);

        inner
            .snapshot
            .send_modify(|s| s.signaling_state = signaling_state);
        info!(
            initiator = inner.is_initiator,
            ice_servers = inner.config.ice_servers.len(),
            "peer connection initialized"
        );
        Ok(())
    }

    /// Sends a fresh offer. Initiator only.
    pub async fn create_offer(&self) -> Result<(), FixoError> {
        self.inner.negotiate(false).await
    }

    /// Sends an offer with fresh ICE credentials. Initiator only.
    pub async fn restart_ice(&self) -> Result<(), FixoError> {
        self.inner.negotiate(true).await
    }

    /// Captures the screen and attaches it to the connection.
    ///
    /// A share already in progress is replaced. When capture ends on the
    /// platform side the share is stopped as if [`stop_screen_share`] had
    /// been called.
    ///
    /// [`stop_screen_share`]: PeerConnectionManager::stop_screen_share
    #[instrument(skip(self), fields(session_id = %self.inner.session_id))]
    pub async fn start_screen_share(&self) -> Result<(), FixoError> {
        let inner = &self.inner;
        let pc = inner.peer().await?;
        let options = DisplayMediaOptions {
            display_surface: DisplaySurface::Monitor,
            audio: inner.config.screen_share_audio,
        };
        let stream = inner
            .prompt(inner.services.media.get_display_media(options))
            .await?;
        let Some(video) = stream.tracks_of(MediaKind::Video).next().cloned() else {
            stream.stop_all();
            return Err(FixoError::media(
                MediaErrorKind::Other,
                "display capture returned no video track",
            ));
        };

        let added = {
            let mut local = inner.local.lock().await;
            for id in std::mem::take(&mut local.screen_tracks) {
                if let Some(old) = local.stream.remove_track(&id) {
                    old.stop();
                }
            }
            let mut added = false;
            for track in stream.tracks() {
                match inner.attach(pc.as_ref(), &mut local, track.clone()).await {
                    Ok(new_sender) => {
                        added |= new_sender;
                        local.screen_tracks.push(track.id().to_string());
                    }
                    Err(e) => {
                        stream.stop_all();
                        inner.publish_local(&local);
                        return Err(e);
                    }
                }
            }
            local.screen_sharing = true;
            inner.publish_local(&local);
            added
        };

        let weak = Arc::downgrade(inner);
        let watcher = tokio::spawn(async move {
            video.ended().await;
            if let Some(inner) = weak.upgrade() {
                inner.screen_track_ended(video.id()).await;
            }
        });
        inner.tasks.lock().await.push(watcher.abort_handle());

        info!(tracks = stream.tracks().len(), "screen share started");
        if added {
            inner.renegotiate().await?;
        }
        Ok(())
    }

    /// Stops the shared screen's video. Idempotent.
    pub async fn stop_screen_share(&self) {
        self.inner.stop_screen_video().await;
    }

    /// Captures the microphone and merges it into the local stream.
    ///
    /// Renegotiates exactly once if a new sender was needed; the answering
    /// side asks the initiator to do it.
    #[instrument(skip(self), fields(session_id = %self.inner.session_id))]
    pub async fn start_audio(&self) -> Result<(), FixoError> {
        let inner = &self.inner;
        let pc = inner.peer().await?;
        if !inner.local.lock().await.mic_tracks.is_empty() {
            return Ok(());
        }
        let stream = inner
            .prompt(
                inner
                    .services
                    .media
                    .get_user_media(AudioConstraints::default()),
            )
            .await?;
        let tracks: Vec<MediaTrack> = stream.tracks_of(MediaKind::Audio).cloned().collect();
        if tracks.is_empty() {
            stream.stop_all();
            return Err(FixoError::media(
                MediaErrorKind::Other,
                "microphone capture returned no audio track",
            ));
        }

        let added = {
            let mut local = inner.local.lock().await;
            if !local.mic_tracks.is_empty() {
                // a concurrent call won the prompt race
                stream.stop_all();
                return Ok(());
            }
            let mut added = false;
            for track in tracks {
                match inner.attach(pc.as_ref(), &mut local, track.clone()).await {
                    Ok(new_sender) => {
                        added |= new_sender;
                        local.mic_tracks.push(track.id().to_string());
                    }
                    Err(e) => {
                        stream.stop_all();
                        inner.publish_local(&local);
                        return Err(e);
                    }
                }
            }
            inner.publish_local(&local);
            added
        };

        info!("microphone enabled");
        if added {
            inner.renegotiate().await?;
        }
        Ok(())
    }

    /// Stops the microphone. Senders stay in place for reuse.
    pub async fn stop_audio(&self) {
        let inner = &self.inner;
        let mut local = inner.local.lock().await;
        if local.mic_tracks.is_empty() {
            return;
        }
        for id in std::mem::take(&mut local.mic_tracks) {
            if let Some(track) = local.stream.remove_track(&id) {
                track.stop();
            }
        }
        inner.publish_local(&local);
        info!("microphone disabled");
    }

    /// Flips the microphone. Returns whether it is now on.
    pub async fn toggle_audio(&self) -> Result<bool, FixoError> {
        if self.snapshot().audio_enabled {
            self.stop_audio().await;
            Ok(false)
        } else {
            self.start_audio().await?;
            Ok(true)
        }
    }

    /// Stops capture, closes the connection and clears all published state.
    /// Safe to call any number of times.
    pub async fn cleanup(&self) {
        let inner = &self.inner;
        let first = !inner.closed.swap(true, Ordering::SeqCst);
        for task in inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        {
            let mut local = inner.local.lock().await;
            local.stream.stop_all();
            *local = LocalMedia::default();
        }
        let pc = inner.pc.lock().await.take();
        if let Some(pc) = pc
            && let Err(e) = pc.close().await
        {
            warn!(session_id = %inner.session_id, error = %e, "closing peer connection failed");
        }
        inner.snapshot.send_modify(|s| {
            *s = PeerSnapshot {
                connection_state: ConnectionState::Closed,
                ice_connection_state: IceConnectionState::Closed,
                signaling_state: SignalingState::Closed,
                ..PeerSnapshot::default()
            };
        });
        if first {
            info!(session_id = %inner.session_id, "peer connection cleaned up");
        }
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.inner.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Inner {
    async fn peer(&self) -> Result<Arc<dyn PeerConnection>, FixoError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FixoError::Negotiation("peer connection is closed".into()));
        }
        self.pc
            .lock()
            .await
            .clone()
            .ok_or_else(|| FixoError::Negotiation("peer connection not initialized".into()))
    }

    async fn prompt<F>(&self, capture: F) -> Result<MediaStream, FixoError>
    where
        F: Future<Output = Result<MediaStream, FixoError>>,
    {
        let limit = self.config.media_prompt_timeout();
        tokio::time::timeout(limit, capture)
            .await
            .map_err(|_| FixoError::Timeout { duration: limit })?
    }

    /// Puts `track` on a sender: an idle sender of the same kind is reused,
    /// otherwise a new one is added. Returns whether a sender was added.
    async fn attach(
        &self,
        pc: &dyn PeerConnection,
        local: &mut LocalMedia,
        track: MediaTrack,
    ) -> Result<bool, FixoError> {
        let idle = local
            .senders
            .iter_mut()
            .find(|slot| slot.kind == track.kind() && !slot.track.is_live());
        let added = match idle {
            Some(slot) => {
                pc.replace_track(&slot.id, &track).await?;
                debug!(sender = %slot.id.0, kind = %track.kind(), "replaced track on idle sender");
                slot.track = track.clone();
                false
            }
            None => {
                let id = pc.add_track(&track).await?;
                debug!(sender = %id.0, kind = %track.kind(), "added sender");
                local.senders.push(SenderSlot {
                    id,
                    kind: track.kind(),
                    track: track.clone(),
                });
                true
            }
        };
        local.stream.add_track(track);
        Ok(added)
    }

    fn publish_local(&self, local: &LocalMedia) {
        let stream = (!local.stream.is_empty()).then(|| local.stream.clone());
        let screen_sharing = local.screen_sharing;
        let audio_enabled = !local.mic_tracks.is_empty();
        self.snapshot.send_modify(|s| {
            s.local_stream = stream;
            s.screen_sharing = screen_sharing;
            s.audio_enabled = audio_enabled;
        });
    }

    async fn screen_track_ended(&self, track_id: &str) {
        let current = self
            .local
            .lock()
            .await
            .screen_tracks
            .iter()
            .any(|id| id == track_id);
        if current {
            info!(session_id = %self.session_id, "screen capture ended by the platform");
            self.stop_screen_video().await;
        }
    }

    async fn stop_screen_video(&self) {
        let mut local = self.local.lock().await;
        if !local.screen_sharing {
            return;
        }
        let video: Vec<String> = local
            .stream
            .tracks_of(MediaKind::Video)
            .map(|t| t.id().to_string())
            .collect();
        for id in &video {
            if let Some(track) = local.stream.remove_track(id) {
                track.stop();
            }
        }
        local.screen_tracks.retain(|id| !video.contains(id));
        local.screen_sharing = false;
        self.publish_local(&local);
        drop(local);
        let _ = self.events.send(RtcEvent::ScreenShareEnded);
        info!(session_id = %self.session_id, "screen share stopped");
    }

    fn sync_signaling_state(&self, pc: &dyn PeerConnection) {
        let state = pc.signaling_state();
        self.snapshot
            .send_if_modified(|s| std::mem::replace(&mut s.signaling_state, state) != state);
    }

    /// Offer/answer round, initiator side.
    async fn negotiate(&self, ice_restart: bool) -> Result<(), FixoError> {
        if !self.is_initiator {
            return Err(FixoError::Negotiation(
                "only the session initiator creates offers".into(),
            ));
        }
        let _guard = self.negotiation.lock().await;
        let pc = self.peer().await?;
        self.wait_for_stable(pc.as_ref()).await?;

        let offer = pc.create_offer(ice_restart).await?;
        pc.set_local_description(offer.clone()).await?;
        self.sync_signaling_state(pc.as_ref());
        self.send_signal(SignalType::Offer, &offer).await?;
        info!(session_id = %self.session_id, ice_restart, "offer sent");
        Ok(())
    }

    /// Gets new local senders onto the wire.
    async fn renegotiate(&self) -> Result<(), FixoError> {
        if self.is_initiator {
            return self.negotiate(false).await;
        }
        self.send_signal(SignalType::Renegotiate, &serde_json::Map::new())
            .await?;
        info!(session_id = %self.session_id, "renegotiation requested");
        Ok(())
    }

    /// Runs an offer round off the signal loop, which must keep applying
    /// answers while the round waits for a stable state.
    async fn spawn_negotiation(self: &Arc<Self>, ice_restart: bool) {
        let inner = Arc::clone(self);
        let round = tokio::spawn(async move {
            if let Err(e) = inner.negotiate(ice_restart).await {
                inner.report(SignalType::Offer, &e);
            }
        });
        self.tasks.lock().await.push(round.abort_handle());
    }

    async fn wait_for_stable(&self, pc: &dyn PeerConnection) -> Result<(), FixoError> {
        let started = Instant::now();
        let mut delay = self.config.stable_poll_initial();
        loop {
            match pc.signaling_state() {
                SignalingState::Stable => return Ok(()),
                SignalingState::Closed => {
                    return Err(FixoError::Negotiation("peer connection is closed".into()));
                }
                state => {
                    let waited = started.elapsed();
                    if waited >= self.config.stable_timeout() {
                        warn!(%state, ?waited, "signaling never settled");
                        return Err(FixoError::Timeout { duration: waited });
                    }
                    debug!(%state, ?delay, "waiting for stable signaling state");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.stable_poll_max());
                }
            }
        }
    }

    async fn send_signal<T: Serialize>(
        &self,
        signal_type: SignalType,
        payload: &T,
    ) -> Result<SignalEnvelope, FixoError> {
        let signal_data = serde_json::to_value(payload)
            .map_err(|e| FixoError::Internal(format!("encode {signal_type} payload: {e}")))?;
        self.services
            .relay
            .send_signal(
                &self.identity,
                NewSignal {
                    session_id: self.session_id.clone(),
                    signal_type,
                    signal_data,
                },
            )
            .await
    }

    fn report(&self, signal_type: SignalType, error: &FixoError) {
        warn!(session_id = %self.session_id, %signal_type, error = %error, "signal failed");
        let _ = self.events.send(RtcEvent::SignalFailed {
            signal_type,
            message: error.to_string(),
        });
    }

    async fn handle_peer_event(self: &Arc<Self>, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate(candidate) => {
                if let Err(e) = self.send_signal(SignalType::IceCandidate, &candidate).await {
                    self.report(SignalType::IceCandidate, &e);
                }
            }
            PeerEvent::Track(track) => {
                let added = self.snapshot.send_if_modified(|s| {
                    s.remote_stream
                        .get_or_insert_with(RemoteStream::default)
                        .add(track.clone())
                });
                if added {
                    info!(session_id = %self.session_id, kind = %track.kind, "remote track received");
                    let _ = self.events.send(RtcEvent::RemoteTrack(track));
                }
            }
            PeerEvent::ConnectionState(state) => {
                self.snapshot.send_modify(|s| s.connection_state = state);
                info!(session_id = %self.session_id, %state, "connection state changed");
                let _ = self.events.send(RtcEvent::ConnectionState(state));
            }
            PeerEvent::IceConnectionState(state) => {
                self.snapshot.send_modify(|s| s.ice_connection_state = state);
                debug!(session_id = %self.session_id, %state, "ice connection state changed");
                if state != IceConnectionState::Failed {
                    return;
                }
                if !self.is_initiator {
                    warn!(session_id = %self.session_id, "ICE failed, waiting for the initiator to restart");
                    return;
                }
                warn!(session_id = %self.session_id, "ICE failed, restarting");
                let _ = self.events.send(RtcEvent::IceRestart);
                self.spawn_negotiation(true).await;
            }
        }
    }

    async fn handle_signal(
        self: &Arc<Self>,
        envelope: SignalEnvelope,
        remote: &mut RemoteSignals,
    ) -> Result<(), FixoError> {
        if envelope.sender_id == self.identity.user_id {
            return Ok(());
        }
        let pc = self.peer().await?;
        match envelope.signal_type {
            SignalType::Offer => {
                if self.is_initiator {
                    return Err(FixoError::Negotiation(
                        "ignoring offer: this side initiates the session".into(),
                    ));
                }
                let offer: SessionDescription = decode(&envelope)?;
                if offer.sdp_type != SdpType::Offer {
                    return Err(FixoError::Validation(format!(
                        "offer signal carries a {} description",
                        offer.sdp_type
                    )));
                }
                pc.set_remote_description(offer).await?;
                self.flush_candidates(pc.as_ref(), remote).await;
                let answer = pc.create_answer().await?;
                pc.set_local_description(answer.clone()).await?;
                self.send_signal(SignalType::Answer, &answer).await?;
                debug!(session_id = %self.session_id, "offer answered");
            }
            SignalType::Answer => {
                let state = pc.signaling_state();
                if state != SignalingState::HaveLocalOffer {
                    return Err(FixoError::Negotiation(format!(
                        "ignoring answer in signaling state {state}"
                    )));
                }
                let answer: SessionDescription = decode(&envelope)?;
                pc.set_remote_description(answer).await?;
                self.flush_candidates(pc.as_ref(), remote).await;
                debug!(session_id = %self.session_id, "answer applied");
            }
            SignalType::IceCandidate => {
                let candidate: IceCandidate = decode(&envelope)?;
                if remote.described {
                    pc.add_ice_candidate(candidate).await?;
                } else {
                    remote.pending.push(candidate);
                }
            }
            SignalType::Renegotiate => {
                if !self.is_initiator {
                    return Err(FixoError::Negotiation(
                        "ignoring renegotiation request: this side answers".into(),
                    ));
                }
                debug!(session_id = %self.session_id, "renegotiation requested by peer");
                self.spawn_negotiation(false).await;
            }
        }
        self.sync_signaling_state(pc.as_ref());
        Ok(())
    }

    async fn flush_candidates(&self, pc: &dyn PeerConnection, remote: &mut RemoteSignals) {
        remote.described = true;
        for candidate in remote.pending.drain(..) {
            if let Err(e) = pc.add_ice_candidate(candidate).await {
                self.report(SignalType::IceCandidate, &e);
            }
        }
    }
}

fn decode<T: DeserializeOwned>(envelope: &SignalEnvelope) -> Result<T, FixoError> {
    serde_json::from_value(envelope.signal_data.clone()).map_err(|e| {
        FixoError::Validation(format!(
            "malformed {} payload in signal {}: {e}",
            envelope.signal_type, envelope.id
        ))
    })
}

async fn run_peer_events(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<PeerEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_peer_event(event).await;
    }
}

/// Applies relayed envelopes one at a time, in insert order.
async fn run_signals(inner: Weak<Inner>, mut signals: Subscription<SignalEnvelope>) {
    let mut remote = RemoteSignals::default();
    while let Some(envelope) = signals.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let signal_type = envelope.signal_type;
        if let Err(e) = inner.handle_signal(envelope, &mut remote).await {
            inner.report(signal_type, &e);
        }
    }
}
