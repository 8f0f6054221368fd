// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Real-time media for Fixo sessions.
//!
//! [`PeerConnectionManager`] drives one WebRTC call per mounted session over
//! the signaling relay. Capture and the peer connection itself sit behind
//! the [`MediaDevices`] and [`PeerConnectionFactory`] traits; the `webrtc`
//! feature (on by default) provides [`WebRtcFactory`].

pub mod manager;
pub mod media;
pub mod peer;
#[cfg(feature = "webrtc")]
pub mod webrtc_backend;

pub use manager::{PeerConnectionManager, PeerSnapshot, RtcEvent, RtcServices};
pub use media::{
    AudioConstraints, DisplayMediaOptions, DisplaySurface, MediaDevices, MediaFrame, MediaKind,
    MediaStream, MediaTrack, UnsupportedMediaDevices,
};
pub use peer::{
    ConnectionState, IceCandidate, IceConnectionState, PeerConnection, PeerConnectionFactory,
    PeerEvent, RemoteStream, RemoteTrack, RtcConfiguration, SdpType, SenderId,
    SessionDescription, SignalingState,
};
#[cfg(feature = "webrtc")]
pub use webrtc_backend::WebRtcFactory;
