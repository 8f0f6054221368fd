// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Object storage for file attachments.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FixoError;

/// Stores attachment bytes and hands out time-limited access URLs.
///
/// Paths are store-relative (`{session_id}/{millis}.{ext}`). Media streams
/// never pass through a blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), FixoError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, FixoError>;

    /// Signed URL for `path`, valid for `ttl` or the store's default.
    fn access_url(&self, path: &str, ttl: Option<Duration>) -> Result<String, FixoError>;
}
