// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background expiry of signal envelopes.
//!
//! Envelopes only matter while a negotiation is in flight. The pruner deletes
//! everything older than `signaling.ttl_secs` on a fixed interval until its
//! cancellation token fires.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fixo_config::model::SignalingConfig;
use fixo_core::FixoError;
use fixo_storage::Database;
use fixo_storage::queries::signals;

/// Deletes envelopes older than `ttl`. Returns how many were removed.
pub async fn prune_once(db: &Database, ttl: Duration) -> Result<u64, FixoError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| FixoError::Config(format!("signal ttl out of range: {e}")))?;
    let cutoff = (chrono::Utc::now() - ttl)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string();
    signals::prune_signals(db, &cutoff).await
}

pub fn spawn_signal_pruner(
    db: Database,
    config: SignalingConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.prune_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            ttl_secs = config.ttl_secs,
            interval_secs = config.prune_interval_secs,
            "signal pruner started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match prune_once(&db, config.ttl()).await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "expired signals pruned"),
                        Err(e) => warn!(error = %e, "signal pruning failed (non-fatal)"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("signal pruner shutting down");
                    break;
                }
            }
        }
    })
}
