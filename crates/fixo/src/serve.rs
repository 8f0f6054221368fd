// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `fixo serve` command implementation.
//!
//! Opens SQLite storage and the attachment store, wires them into a
//! [`LocalBackend`], starts the signal pruner and serves the gateway until
//! SIGINT/SIGTERM.

use std::sync::Arc;

use tracing::{info, warn};

use fixo_bus::ChangeFeed;
use fixo_config::FixoConfig;
use fixo_core::{BlobStore, FixoError, PluginAdapter, StorageAdapter};
use fixo_engine::{LocalBackend, spawn_signal_pruner};
use fixo_gateway::{GatewayState, TokenSigner, start_server};
use fixo_storage::{FsBlobStore, SqliteStorage};

use crate::shutdown;

/// Runs the `fixo serve` command.
pub async fn run_serve(config: FixoConfig) -> Result<(), FixoError> {
    init_tracing(&config.app.log_level);
    info!(name = %config.app.name, "starting fixo serve");

    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    let db = storage.database()?.clone();

    let base_url = config.gateway.base_url();
    let files = Arc::new(match TokenSigner::from_config(&config.gateway) {
        Some(signer) => FsBlobStore::new(&config.blobs, &base_url, signer.key()),
        None => {
            warn!("gateway.token_secret is not set; attachment links are only valid until restart");
            FsBlobStore::with_ephemeral_key(&config.blobs, &base_url)
        }
    });
    let health = files.health_check().await?;
    info!(root = %files.root().display(), health = ?health, "attachment store ready");

    let blobs: Arc<dyn BlobStore> = files.clone();
    let backend = Arc::new(LocalBackend::new(
        db.clone(),
        ChangeFeed::default(),
        blobs,
        &config,
    ));

    let cancel = shutdown::install_signal_handler();
    let pruner = spawn_signal_pruner(db, config.signaling.clone(), cancel.clone());

    let state = GatewayState::new(
        backend,
        files,
        &config.gateway,
        config.blobs.max_upload_bytes,
    );
    let served = start_server(&config.gateway, state, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = pruner.await {
        warn!(error = %e, "signal pruner task ended abnormally");
    }
    storage.close().await?;
    info!("fixo serve stopped");
    served
}

pub(crate) fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fixo={log_level},warn")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init();
}
