// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filesystem attachment store with HMAC-signed download links.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use fixo_config::model::BlobConfig;
use fixo_core::{AdapterType, BlobStore, FixoError, HealthStatus, PluginAdapter};

type HmacSha256 = Hmac<Sha256>;

const MAX_EXTENSION_LEN: usize = 10;

/// Build the store path for an upload: `{session_id}/{millis}.{ext}`.
///
/// The extension comes from `file_name`, lowercased and stripped to ASCII
/// alphanumerics; names without one get `bin`.
pub fn attachment_path(session_id: &str, file_name: &str, millis: i64) -> Result<String, FixoError> {
    let name = file_name.trim();
    if name.is_empty() {
        return Err(FixoError::Validation("file name must not be empty".into()));
    }
    if session_id.is_empty() || !session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(FixoError::Validation(format!(
            "invalid session id for attachment: `{session_id}`"
        )));
    }
    let ext: String = name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_EXTENSION_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    let ext = if ext.is_empty() { "bin".to_string() } else { ext };
    Ok(format!("{session_id}/{millis}.{ext}"))
}

/// Attachment bytes under a root directory, one subdirectory per session.
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
    key: Vec<u8>,
    default_ttl: Duration,
}

impl FsBlobStore {
    /// `base_url` is the gateway origin serving `/files/{path}`.
    pub fn new(config: &BlobConfig, base_url: impl Into<String>, key: &[u8]) -> Self {
        Self {
            root: PathBuf::from(&config.root_dir),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: key.to_vec(),
            default_ttl: config.url_ttl(),
        }
    }

    /// A store whose links are only valid for this process.
    pub fn with_ephemeral_key(config: &BlobConfig, base_url: impl Into<String>) -> Self {
        let key: [u8; 32] = rand::random();
        Self::new(config, base_url, &key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FixoError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    fn mac(&self, path: &str, expires: i64) -> Result<HmacSha256, FixoError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| FixoError::Internal(format!("invalid signing key: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Check a download link's signature and expiry.
    pub fn verify(&self, path: &str, expires: i64, signature: &str) -> Result<(), FixoError> {
        validate_path(path)?;
        if chrono::Utc::now().timestamp() > expires {
            return Err(FixoError::Forbidden("download link expired".into()));
        }
        let provided = hex::decode(signature)
            .map_err(|_| FixoError::Forbidden("malformed link signature".into()))?;
        self.mac(path, expires)?
            .verify_slice(&provided)
            .map_err(|_| FixoError::Forbidden("invalid link signature".into()))
    }
}

/// Relative, normal components only: no `..`, no absolute paths.
fn validate_path(path: &str) -> Result<(), FixoError> {
    let candidate = Path::new(path);
    let ok = !path.is_empty()
        && !path.contains('\\')
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(FixoError::Validation(format!("invalid attachment path `{path}`")))
    }
}

/// Writes `bytes` to the freshly created `target`, removing it again if the
/// write does not complete.
async fn write_or_discard<W>(mut file: W, target: &Path, bytes: &[u8]) -> Result<(), FixoError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    let Err(e) = written else {
        return Ok(());
    };
    drop(file);
    if let Err(rm) = tokio::fs::remove_file(target).await {
        warn!(path = %target.display(), error = %rm, "partial attachment left behind");
    }
    Err(FixoError::Storage {
        source: Box::new(e),
    })
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> Result<(), FixoError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FixoError::Storage {
                    source: Box::new(e),
                })?;
        }
        let len = bytes.len();
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await;
        let file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(FixoError::Conflict(format!("attachment `{path}` already exists")));
            }
            Err(e) => {
                return Err(FixoError::Storage {
                    source: Box::new(e),
                });
            }
        };
        write_or_discard(file, &target, &bytes).await?;
        debug!(path, bytes = len, "attachment stored");
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, FixoError> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FixoError::NotFound(format!("attachment {path}"))
            } else {
                FixoError::Storage {
                    source: Box::new(e),
                }
            }
        })
    }

    fn access_url(&self, path: &str, ttl: Option<Duration>) -> Result<String, FixoError> {
        validate_path(path)?;
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let sig = hex::encode(self.mac(path, expires)?.finalize().into_bytes());
        Ok(format!(
            "{}/files/{path}?expires={expires}&sig={sig}",
            self.base_url
        ))
    }
}

#[async_trait]
impl PluginAdapter for FsBlobStore {
    fn name(&self) -> &str {
        "fs-blob"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Blob
    }

    async fn health_check(&self) -> Result<HealthStatus, FixoError> {
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(format!(
                "attachment root {} unusable: {e}",
                self.root.display()
            ))),
        }
    }

    async fn shutdown(&self) -> Result<(), FixoError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(root: &Path) -> FsBlobStore {
        let config = BlobConfig {
            root_dir: root.display().to_string(),
            url_ttl_secs: 60,
            max_upload_bytes: 1024,
        };
        FsBlobStore::new(&config, "http://localhost:3180/", b"test-key")
    }

    #[test]
    fn attachment_path_uses_session_namespace() {
        assert_eq!(
            attachment_path("abc-1", "Screen Shot.PNG", 1700000000000).unwrap(),
            "abc-1/1700000000000.png"
        );
        assert_eq!(attachment_path("abc", "README", 5).unwrap(), "abc/5.bin");
        assert!(attachment_path("abc", "   ", 5).is_err());
        assert!(attachment_path("../etc", "x.png", 5).is_err());
    }

    struct BrokenDisk;

    impl AsyncWrite for BrokenDisk {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::Error::other("disk full")))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_write_removes_the_partial_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("partial.png");
        std::fs::write(&target, b"half").unwrap();

        let err = write_or_discard(BrokenDisk, &target, b"whole image")
            .await
            .unwrap_err();
        assert!(matches!(err, FixoError::Storage { .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn upload_download_and_signed_url() {
        let dir = tempdir().unwrap();
        let blobs = store(dir.path());
        blobs.upload("s1/1.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(blobs.download("s1/1.txt").await.unwrap(), b"hello");

        let url = blobs.access_url("s1/1.txt", None).unwrap();
        assert!(url.starts_with("http://localhost:3180/files/s1/1.txt?expires="));
        let query = url.split_once('?').unwrap().1;
        let mut expires = 0;
        let mut sig = "";
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("sig", v) => sig = v,
                _ => {}
            }
        }
        blobs.verify("s1/1.txt", expires, sig).unwrap();
        assert!(blobs.verify("s1/2.txt", expires, sig).is_err());
        assert!(blobs.verify("s1/1.txt", expires - 1000, sig).is_err());
    }

    #[tokio::test]
    async fn duplicate_upload_conflicts() {
        let dir = tempdir().unwrap();
        let blobs = store(dir.path());
        blobs.upload("s1/1.txt", b"a".to_vec()).await.unwrap();
        let err = blobs.upload("s1/1.txt", b"b".to_vec()).await.unwrap_err();
        assert!(matches!(err, FixoError::Conflict(_)));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempdir().unwrap();
        let blobs = store(dir.path());
        for bad in ["../x", "/etc/passwd", "", "a\\b"] {
            assert!(blobs.upload(bad, vec![1]).await.is_err(), "{bad}");
        }
        assert!(matches!(
            blobs.download("s1/none.txt").await,
            Err(FixoError::NotFound(_))
        ));
    }
}
