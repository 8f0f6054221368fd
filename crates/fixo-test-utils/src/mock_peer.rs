// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted peer connections for deterministic call tests.
//!
//! `MockPeerConnection` follows the browser's signaling state machine
//! (stable / have-local-offer / have-remote-offer) and rejects transitions a
//! real connection would reject. Descriptions are plain text with one
//! `track:{kind}:{id}` line per sender, so two mocks wired through a real
//! signaling relay see each other's tracks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use fixo_core::FixoError;
use fixo_rtc::{
    ConnectionState, IceCandidate, MediaKind, MediaTrack, PeerConnection, PeerConnectionFactory,
    PeerEvent, RemoteTrack, RtcConfiguration, SdpType, SenderId, SessionDescription,
    SignalingState,
};

#[derive(Default)]
struct PeerLog {
    signaling: SignalingState,
    senders: Vec<(SenderId, MediaTrack)>,
    offers: Vec<SessionDescription>,
    answers: Vec<SessionDescription>,
    local: Vec<SessionDescription>,
    remote: Vec<SessionDescription>,
    candidates: Vec<IceCandidate>,
    replaced: Vec<(SenderId, String)>,
    connected: bool,
    closed: bool,
}

pub struct MockPeerConnection {
    index: usize,
    ice_servers: Vec<String>,
    events: mpsc::UnboundedSender<PeerEvent>,
    log: Mutex<PeerLog>,
}

impl MockPeerConnection {
    fn new(index: usize, config: &RtcConfiguration, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            index,
            ice_servers: config.ice_servers.clone(),
            events,
            log: Mutex::new(PeerLog::default()),
        }
    }

    pub fn ice_servers(&self) -> &[String] {
        &self.ice_servers
    }

    /// Offers created so far, including ones never applied.
    pub fn offers(&self) -> Vec<SessionDescription> {
        self.log().offers.clone()
    }

    pub fn answers(&self) -> Vec<SessionDescription> {
        self.log().answers.clone()
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.log().local.clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.log().remote.clone()
    }

    /// Remote candidates applied with `add_ice_candidate`.
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.log().candidates.clone()
    }

    /// Track ids currently on each sender, in sender order.
    pub fn sender_tracks(&self) -> Vec<(SenderId, String)> {
        self.log()
            .senders
            .iter()
            .map(|(id, track)| (id.clone(), track.id().to_string()))
            .collect()
    }

    pub fn replaced(&self) -> Vec<(SenderId, String)> {
        self.log().replaced.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.log().closed
    }

    /// Forces the signaling state, e.g. to hold a negotiation open.
    pub fn set_signaling_state(&self, state: SignalingState) {
        self.log().signaling = state;
    }

    /// Delivers `event` as if the connection had raised it.
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn log(&self) -> std::sync::MutexGuard<'_, PeerLog> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn describe(&self, log: &PeerLog, ice_restart: bool) -> String {
        let mut sdp = format!("v=0\no=mock {} 0 IN IP4 127.0.0.1\n", self.index);
        for (_, track) in &log.senders {
            sdp.push_str(&format!("track:{}:{}\n", track.kind(), track.id()));
        }
        if ice_restart {
            sdp.push_str("ice-restart\n");
        }
        sdp
    }

    fn candidate(&self, n: usize) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{n} 1 udp 2122260223 10.0.0.{} {} typ host",
                self.index,
                50000 + n
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    /// Emits `Connected` the first time a negotiation settles.
    fn settle(&self, log: &mut PeerLog) -> Option<PeerEvent> {
        if log.signaling == SignalingState::Stable && !log.connected {
            log.connected = true;
            return Some(PeerEvent::ConnectionState(ConnectionState::Connected));
        }
        None
    }
}

fn remote_tracks(desc: &SessionDescription) -> Vec<RemoteTrack> {
    desc.sdp
        .lines()
        .filter_map(|line| {
            let mut parts = line.strip_prefix("track:")?.splitn(2, ':');
            let kind = match parts.next()? {
                "audio" => MediaKind::Audio,
                "video" => MediaKind::Video,
                _ => return None,
            };
            Some(RemoteTrack {
                id: parts.next()?.to_string(),
                kind,
                stream_id: "remote".into(),
            })
        })
        .collect()
}

fn closed() -> FixoError {
    FixoError::Negotiation("mock peer connection is closed".into())
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, FixoError> {
        let mut log = self.log();
        if log.closed {
            return Err(closed());
        }
        let offer = SessionDescription::offer(self.describe(&log, ice_restart));
        log.offers.push(offer.clone());
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, FixoError> {
        let mut log = self.log();
        if log.closed {
            return Err(closed());
        }
        if log.signaling != SignalingState::HaveRemoteOffer {
            return Err(FixoError::Negotiation(format!(
                "cannot answer in signaling state {}",
                log.signaling
            )));
        }
        let answer = SessionDescription::answer(self.describe(&log, false));
        log.answers.push(answer.clone());
        Ok(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), FixoError> {
        let mut events = Vec::new();
        {
            let mut log = self.log();
            if log.closed {
                return Err(closed());
            }
            log.signaling = match (log.signaling, desc.sdp_type) {
                (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveLocalOffer,
                (SignalingState::HaveRemoteOffer, SdpType::Answer) => SignalingState::Stable,
                (state, kind) => {
                    return Err(FixoError::Negotiation(format!(
                        "cannot set local {kind} in signaling state {state}"
                    )));
                }
            };
            log.local.push(desc);
            if log.local.len() == 1 {
                events.push(PeerEvent::ConnectionState(ConnectionState::Connecting));
            }
            events.push(PeerEvent::IceCandidate(self.candidate(log.local.len())));
            events.extend(self.settle(&mut log));
        }
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), FixoError> {
        let mut events = Vec::new();
        {
            let mut log = self.log();
            if log.closed {
                return Err(closed());
            }
            log.signaling = match (log.signaling, desc.sdp_type) {
                (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveRemoteOffer,
                (SignalingState::HaveLocalOffer, SdpType::Answer) => SignalingState::Stable,
                (state, kind) => {
                    return Err(FixoError::Negotiation(format!(
                        "cannot set remote {kind} in signaling state {state}"
                    )));
                }
            };
            events.extend(remote_tracks(&desc).into_iter().map(PeerEvent::Track));
            log.remote.push(desc);
            events.extend(self.settle(&mut log));
        }
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), FixoError> {
        let mut log = self.log();
        if log.closed {
            return Err(closed());
        }
        if log.remote.is_empty() {
            return Err(FixoError::Negotiation(
                "remote candidate before any remote description".into(),
            ));
        }
        log.candidates.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.log().signaling
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<SenderId, FixoError> {
        let mut log = self.log();
        if log.closed {
            return Err(closed());
        }
        let id = SenderId(format!("sender-{}-{}", self.index, log.senders.len() + 1));
        log.senders.push((id.clone(), track.clone()));
        Ok(id)
    }

    async fn replace_track(&self, sender: &SenderId, track: &MediaTrack) -> Result<(), FixoError> {
        let mut log = self.log();
        let slot = log
            .senders
            .iter_mut()
            .find(|(id, _)| id == sender)
            .ok_or_else(|| FixoError::NotFound(format!("sender {}", sender.0)))?;
        slot.1 = track.clone();
        log.replaced.push((sender.clone(), track.id().to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<(), FixoError> {
        {
            let mut log = self.log();
            if log.closed {
                return Ok(());
            }
            log.closed = true;
            log.signaling = SignalingState::Closed;
        }
        self.emit(PeerEvent::ConnectionState(ConnectionState::Closed));
        Ok(())
    }
}

/// Hands out [`MockPeerConnection`]s and keeps them for inspection.
#[derive(Default)]
pub struct MockPeerFactory {
    created: Mutex<Vec<Arc<MockPeerConnection>>>,
    counter: AtomicUsize,
}

impl MockPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn created(&self) -> Vec<Arc<MockPeerConnection>> {
        self.created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The most recently created connection.
    pub fn last(&self) -> Option<Arc<MockPeerConnection>> {
        self.created().pop()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(
        &self,
        config: &RtcConfiguration,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, FixoError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let pc = Arc::new(MockPeerConnection::new(index, config, events));
        self.created
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::clone(&pc));
        Ok(pc)
    }
}
