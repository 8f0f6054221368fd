// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local media capture: tracks, streams and the platform capture seam.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::{broadcast, watch};

use fixo_core::{FixoError, MediaErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// One encoded media sample produced by a capture source.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub data: Vec<u8>,
    pub duration: Duration,
}

struct TrackInner {
    id: String,
    kind: MediaKind,
    label: String,
    live: watch::Sender<bool>,
    frames: Option<broadcast::Sender<MediaFrame>>,
}

/// Handle to a captured track. Clones share state.
///
/// A track ends exactly once, either through [`MediaTrack::stop`] or
/// because the platform ended capture (e.g. the OS "stop sharing" button,
/// which capture backends signal by calling `stop` on their copy).
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        Self::build(kind, label.into(), None)
    }

    /// A track whose encoded samples are published on `frames`.
    pub fn with_frames(
        kind: MediaKind,
        label: impl Into<String>,
        frames: broadcast::Sender<MediaFrame>,
    ) -> Self {
        Self::build(kind, label.into(), Some(frames))
    }

    fn build(kind: MediaKind, label: String, frames: Option<broadcast::Sender<MediaFrame>>) -> Self {
        let (live, _) = watch::channel(true);
        Self {
            inner: Arc::new(TrackInner {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                label,
                live,
                frames,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_live(&self) -> bool {
        *self.inner.live.borrow()
    }

    /// End the track. Idempotent.
    pub fn stop(&self) {
        self.inner.live.send_if_modified(|live| std::mem::replace(live, false));
    }

    /// Resolves once the track has ended.
    pub async fn ended(&self) {
        let mut rx = self.inner.live.subscribe();
        // the sender lives in `inner`, which `self` keeps alive
        let _ = rx.wait_for(|live| !*live).await;
    }

    /// Encoded samples, if this track carries any.
    pub fn frames(&self) -> Option<broadcast::Receiver<MediaFrame>> {
        self.inner.frames.as_ref().map(|tx| tx.subscribe())
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("live", &self.is_live())
            .finish()
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A set of local tracks presented to the UI as one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        if !self.tracks.iter().any(|t| t.id() == track.id()) {
            self.tracks.push(track);
        }
    }

    /// Removes and returns the track with `id`.
    pub fn remove_track(&mut self, id: &str) -> Option<MediaTrack> {
        let pos = self.tracks.iter().position(|t| t.id() == id)?;
        Some(self.tracks.remove(pos))
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// What surface a screen capture should offer first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplaySurface {
    #[default]
    Monitor,
    Window,
    Browser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMediaOptions {
    pub display_surface: DisplaySurface,
    /// Also capture system audio.
    pub audio: bool,
}

/// Microphone processing switches. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Platform capture API.
///
/// Either call may wait indefinitely on a permission prompt; callers bound
/// it with a timeout.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_display_media(&self, options: DisplayMediaOptions)
    -> Result<MediaStream, FixoError>;

    /// Microphone-only capture.
    async fn get_user_media(&self, audio: AudioConstraints) -> Result<MediaStream, FixoError>;
}

/// Capture backend for hosts without any capture API (servers, terminals).
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedMediaDevices;

#[async_trait]
impl MediaDevices for UnsupportedMediaDevices {
    async fn get_display_media(
        &self,
        _options: DisplayMediaOptions,
    ) -> Result<MediaStream, FixoError> {
        Err(FixoError::media(
            MediaErrorKind::Unsupported,
            "screen capture is not available on this platform",
        ))
    }

    async fn get_user_media(&self, _audio: AudioConstraints) -> Result<MediaStream, FixoError> {
        Err(FixoError::media(
            MediaErrorKind::Unsupported,
            "microphone capture is not available on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_is_idempotent_and_wakes_waiters() {
        let track = MediaTrack::new(MediaKind::Video, "screen");
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.ended().await })
        };
        assert!(track.is_live());
        track.stop();
        track.stop();
        assert!(!track.is_live());
        waiter.await.unwrap();
        // already ended: resolves immediately
        track.ended().await;
    }

    #[test]
    fn stream_deduplicates_tracks() {
        let audio = MediaTrack::new(MediaKind::Audio, "mic");
        let mut stream = MediaStream::default();
        stream.add_track(audio.clone());
        stream.add_track(audio.clone());
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.tracks_of(MediaKind::Video).count(), 0);
        assert_eq!(stream.remove_track(audio.id()), Some(audio));
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn unsupported_devices_report_unsupported() {
        let devices = UnsupportedMediaDevices;
        let err = devices
            .get_display_media(DisplayMediaOptions {
                display_surface: DisplaySurface::Monitor,
                audio: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FixoError::Media {
                kind: MediaErrorKind::Unsupported,
                ..
            }
        ));
    }
}
