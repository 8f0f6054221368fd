// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock capture devices for deterministic testing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fixo_core::{FixoError, MediaErrorKind};
use fixo_rtc::{
    AudioConstraints, DisplayMediaOptions, MediaDevices, MediaKind, MediaStream, MediaTrack,
};

/// How the next permission prompt is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Grant,
    Deny,
    Unsupported,
    /// The prompt is never answered.
    Hang,
}

/// Capture that hands out synthetic tracks.
///
/// Every granted track is remembered so tests can end capture from the
/// "platform" side with [`MockMediaDevices::end_capture`].
pub struct MockMediaDevices {
    mode: Mutex<CaptureMode>,
    display_prompts: AtomicUsize,
    user_prompts: AtomicUsize,
    granted: Mutex<Vec<MediaTrack>>,
}

impl MockMediaDevices {
    pub fn new() -> Self {
        Self::with_mode(CaptureMode::Grant)
    }

    pub fn with_mode(mode: CaptureMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            display_prompts: AtomicUsize::new(0),
            user_prompts: AtomicUsize::new(0),
            granted: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(mode: CaptureMode) -> Arc<Self> {
        Arc::new(Self::with_mode(mode))
    }

    pub fn set_mode(&self, mode: CaptureMode) {
        *lock(&self.mode) = mode;
    }

    pub fn display_prompts(&self) -> usize {
        self.display_prompts.load(Ordering::SeqCst)
    }

    pub fn user_prompts(&self) -> usize {
        self.user_prompts.load(Ordering::SeqCst)
    }

    /// Tracks handed out so far, in grant order.
    pub fn granted(&self) -> Vec<MediaTrack> {
        lock(&self.granted).clone()
    }

    /// Stops every granted video track, as when the user ends sharing from
    /// the platform's own controls.
    pub fn end_capture(&self) {
        for track in lock(&self.granted).iter() {
            if track.kind() == MediaKind::Video {
                track.stop();
            }
        }
    }

    async fn answer(&self, tracks: Vec<MediaTrack>) -> Result<MediaStream, FixoError> {
        let mode = *lock(&self.mode);
        match mode {
            CaptureMode::Grant => {
                lock(&self.granted).extend(tracks.iter().cloned());
                Ok(MediaStream::new(tracks))
            }
            CaptureMode::Deny => Err(FixoError::media(
                MediaErrorKind::PermissionDenied,
                "the user dismissed the prompt",
            )),
            CaptureMode::Unsupported => Err(FixoError::media(
                MediaErrorKind::Unsupported,
                "no capture API on this host",
            )),
            CaptureMode::Hang => std::future::pending().await,
        }
    }
}

impl Default for MockMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn get_display_media(
        &self,
        options: DisplayMediaOptions,
    ) -> Result<MediaStream, FixoError> {
        let n = self.display_prompts.fetch_add(1, Ordering::SeqCst) + 1;
        let mut tracks = vec![MediaTrack::new(MediaKind::Video, format!("screen-{n}"))];
        if options.audio {
            tracks.push(MediaTrack::new(MediaKind::Audio, format!("system-audio-{n}")));
        }
        self.answer(tracks).await
    }

    async fn get_user_media(&self, _audio: AudioConstraints) -> Result<MediaStream, FixoError> {
        let n = self.user_prompts.fetch_add(1, Ordering::SeqCst) + 1;
        self.answer(vec![MediaTrack::new(MediaKind::Audio, format!("microphone-{n}"))])
            .await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
