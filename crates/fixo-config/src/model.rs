// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a mistyped key fails
//! at startup instead of silently falling back to a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Fixo configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FixoConfig {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Attachment blob store.
    #[serde(default)]
    pub blobs: BlobConfig,

    /// HTTP/WebSocket gateway.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Peer connection and media capture settings.
    #[serde(default)]
    pub rtc: RtcConfig,

    /// Signal envelope retention.
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Remote gateway used by `fixo chat`.
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "fixo".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("fixo/fixo.db").display().to_string())
        .unwrap_or_else(|| "fixo.db".to_string())
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BlobConfig {
    /// Directory holding uploaded attachments, one subdirectory per session.
    #[serde(default = "default_blob_root")]
    pub root_dir: String,

    /// Lifetime of signed download URLs.
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root_dir: default_blob_root(),
            url_ttl_secs: default_url_ttl_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl BlobConfig {
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs)
    }
}

fn default_blob_root() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("fixo/attachments").display().to_string())
        .unwrap_or_else(|| "attachments".to_string())
}

fn default_url_ttl_secs() -> u64 {
    3600
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL used when signing attachment links. Defaults to `http://{host}:{port}`.
    #[serde(default)]
    pub public_url: Option<String>,

    /// HMAC key for identity tokens and attachment URLs. Without it every
    /// authenticated route rejects requests.
    #[serde(default)]
    pub token_secret: Option<String>,

    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
            token_secret: None,
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn base_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
            .trim_end_matches('/')
            .to_string()
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3180
}

fn default_token_ttl_secs() -> u64 {
    12 * 3600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RtcConfig {
    /// STUN/TURN server URLs. At least two independent servers are required.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,

    /// First delay while waiting for a stable signaling state; doubles each poll.
    #[serde(default = "default_stable_poll_initial_ms")]
    pub stable_poll_initial_ms: u64,

    #[serde(default = "default_stable_poll_max_ms")]
    pub stable_poll_max_ms: u64,

    /// Give up on an offer if the connection never settles within this window.
    #[serde(default = "default_stable_timeout_secs")]
    pub stable_timeout_secs: u64,

    /// Upper bound on an unanswered capture permission prompt.
    #[serde(default = "default_media_prompt_timeout_secs")]
    pub media_prompt_timeout_secs: u64,

    /// Ask for system audio together with the screen.
    #[serde(default = "default_true")]
    pub screen_share_audio: bool,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            stable_poll_initial_ms: default_stable_poll_initial_ms(),
            stable_poll_max_ms: default_stable_poll_max_ms(),
            stable_timeout_secs: default_stable_timeout_secs(),
            media_prompt_timeout_secs: default_media_prompt_timeout_secs(),
            screen_share_audio: true,
        }
    }
}

impl RtcConfig {
    pub fn stable_poll_initial(&self) -> Duration {
        Duration::from_millis(self.stable_poll_initial_ms)
    }

    pub fn stable_poll_max(&self) -> Duration {
        Duration::from_millis(self.stable_poll_max_ms)
    }

    pub fn stable_timeout(&self) -> Duration {
        Duration::from_secs(self.stable_timeout_secs)
    }

    pub fn media_prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.media_prompt_timeout_secs)
    }
}

fn default_ice_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

fn default_stable_poll_initial_ms() -> u64 {
    50
}

fn default_stable_poll_max_ms() -> u64 {
    800
}

fn default_stable_timeout_secs() -> u64 {
    10
}

fn default_media_prompt_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SignalingConfig {
    /// Envelopes older than this are pruned.
    #[serde(default = "default_signal_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,

    /// Delete a session's envelopes as soon as it ends.
    #[serde(default = "default_true")]
    pub purge_on_end: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_signal_ttl_secs(),
            prune_interval_secs: default_prune_interval_secs(),
            purge_on_end: true,
        }
    }
}

impl SignalingConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

fn default_signal_ttl_secs() -> u64 {
    900
}

fn default_prune_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Gateway base URL, e.g. `http://127.0.0.1:3180`.
    #[serde(default)]
    pub server_url: Option<String>,

    /// Identity token issued by `fixo token`.
    #[serde(default)]
    pub token: Option<String>,
}
