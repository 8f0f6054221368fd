// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`PeerConnectionFactory`] backed by the `webrtc` crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use fixo_core::FixoError;

use crate::media::{MediaFrame, MediaKind, MediaTrack};
use crate::peer::{
    ConnectionState, IceCandidate, IceConnectionState, PeerConnection, PeerConnectionFactory,
    PeerEvent, RemoteTrack, RtcConfiguration, SdpType, SenderId, SessionDescription,
    SignalingState,
};

const STREAM_ID: &str = "fixo-local";

fn negotiation(context: &str, e: webrtc::Error) -> FixoError {
    FixoError::Negotiation(format!("{context}: {e}"))
}

/// Builds `webrtc` peer connections with the default codecs and interceptors.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcFactory;

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(
        &self,
        config: &RtcConfiguration,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, FixoError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| negotiation("register codecs", e))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| negotiation("register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| negotiation("create peer connection", e))?,
        );

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::IceCandidate(from_init(init)));
                    }
                    Err(e) => warn!(error = %e, "could not serialize local ICE candidate"),
                }
            })
        }));

        let tx = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tx = tx.clone();
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                _ => MediaKind::Video,
            };
            let remote = RemoteTrack {
                id: track.id(),
                kind,
                stream_id: track.stream_id(),
            };
            Box::pin(async move {
                let _ = tx.send(PeerEvent::Track(remote));
            })
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let _ = tx.send(PeerEvent::ConnectionState(connection_state(state)));
            Box::pin(async {})
        }));

        let tx = events;
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let _ = tx.send(PeerEvent::IceConnectionState(ice_state(state)));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeer {
            pc,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

struct SenderEntry {
    sender: Arc<RTCRtpSender>,
    pumps: Vec<AbortHandle>,
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<String, SenderEntry>>,
}

impl WebRtcPeer {
    /// Wraps a capture track in a sample track and starts copying its frames.
    fn local_track(track: &MediaTrack) -> (Arc<TrackLocalStaticSample>, Option<AbortHandle>) {
        let capability = match track.kind() {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            STREAM_ID.to_string(),
        ));
        let pump = track.frames().map(|frames| {
            tokio::spawn(pump_frames(track.clone(), frames, Arc::clone(&local))).abort_handle()
        });
        (local, pump)
    }
}

async fn pump_frames(
    track: MediaTrack,
    mut frames: broadcast::Receiver<MediaFrame>,
    local: Arc<TrackLocalStaticSample>,
) {
    loop {
        let frame = tokio::select! {
            _ = track.ended() => break,
            frame = frames.recv() => frame,
        };
        match frame {
            Ok(frame) => {
                let sample = Sample {
                    data: bytes::Bytes::from(frame.data),
                    duration: frame.duration,
                    ..Default::default()
                };
                if let Err(e) = local.write_sample(&sample).await {
                    debug!(track = track.id(), error = %e, "dropping sample");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(track = track.id(), skipped, "capture outpaced the sender");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// RTCP must be drained for interceptors to work.
fn drain_rtcp(sender: Arc<RTCRtpSender>) -> AbortHandle {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    })
    .abort_handle()
}

impl WebRtcPeer {
    /// Offers always carry an audio and a video section so the answering
    /// side has somewhere to put its own tracks.
    async fn ensure_receivers(&self) -> Result<(), FixoError> {
        let transceivers = self.pc.get_transceivers().await;
        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            if transceivers.iter().any(|t| t.kind() == kind) {
                continue;
            }
            let init = RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            };
            self.pc
                .add_transceiver_from_kind(kind, Some(init))
                .await
                .map_err(|e| negotiation("add receiver", e))?;
            debug!(%kind, "added receive-only transceiver");
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, FixoError> {
        self.ensure_receivers().await?;
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| negotiation("create offer", e))?;
        Ok(to_description(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, FixoError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| negotiation("create answer", e))?;
        Ok(to_description(answer))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), FixoError> {
        let desc = from_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| negotiation("set local description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), FixoError> {
        let desc = from_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| negotiation("set remote description", e))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), FixoError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| negotiation("add ICE candidate", e))
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::Unspecified | RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
        }
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<SenderId, FixoError> {
        let (local, pump) = Self::local_track(track);
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| negotiation("add track", e))?;
        let id = SenderId(uuid::Uuid::new_v4().to_string());
        let mut pumps = vec![drain_rtcp(Arc::clone(&sender))];
        pumps.extend(pump);
        self.senders
            .lock()
            .await
            .insert(id.0.clone(), SenderEntry { sender, pumps });
        Ok(id)
    }

    async fn replace_track(&self, sender: &SenderId, track: &MediaTrack) -> Result<(), FixoError> {
        let mut senders = self.senders.lock().await;
        let entry = senders
            .get_mut(&sender.0)
            .ok_or_else(|| FixoError::NotFound(format!("sender {}", sender.0)))?;
        let (local, pump) = Self::local_track(track);
        entry
            .sender
            .replace_track(Some(local as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| negotiation("replace track", e))?;
        // keep the RTCP reader, swap the frame pump
        for stale in entry.pumps.drain(1..) {
            stale.abort();
        }
        entry.pumps.extend(pump);
        Ok(())
    }

    async fn close(&self) -> Result<(), FixoError> {
        for (_, entry) in self.senders.lock().await.drain() {
            for pump in entry.pumps {
                pump.abort();
            }
        }
        self.pc
            .close()
            .await
            .map_err(|e| negotiation("close peer connection", e))
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_description(desc: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Offer,
    };
    SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    }
}

fn from_description(desc: SessionDescription) -> Result<RTCSessionDescription, FixoError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(FixoError::Negotiation(
                "rollback descriptions are not supported".into(),
            ));
        }
    };
    parsed.map_err(|e| negotiation("parse session description", e))
}

fn connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

fn ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offers_carry_local_media_sections() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pc = WebRtcFactory
            .create(&RtcConfiguration { ice_servers: vec![] }, tx)
            .await
            .unwrap();
        let track = MediaTrack::new(MediaKind::Audio, "mic");
        pc.add_track(&track).await.unwrap();
        let offer = pc.create_offer(false).await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        pc.set_local_description(offer).await.unwrap();
        assert_eq!(pc.signaling_state(), SignalingState::HaveLocalOffer);
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn offers_without_senders_still_receive_both_kinds() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let pc = WebRtcFactory
            .create(&RtcConfiguration { ice_servers: vec![] }, tx)
            .await
            .unwrap();
        let offer = pc.create_offer(false).await.unwrap();
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("a=recvonly"));
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn two_peers_complete_offer_answer() {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let config = RtcConfiguration { ice_servers: vec![] };
        let a = WebRtcFactory.create(&config, tx_a).await.unwrap();
        let b = WebRtcFactory.create(&config, tx_b).await.unwrap();
        a.add_track(&MediaTrack::new(MediaKind::Video, "screen"))
            .await
            .unwrap();

        let offer = a.create_offer(false).await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        assert_eq!(a.signaling_state(), SignalingState::Stable);
        assert_eq!(b.signaling_state(), SignalingState::Stable);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }
}
