// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end session tests.
//!
//! `TestHarness` assembles a [`LocalBackend`] over a temp SQLite database,
//! a temp blob directory and an in-process change feed, and builds
//! orchestrators for student and admin identities on top of it.

use std::sync::Arc;

use fixo_bus::{ChangeFeed, DeviceBus};
use fixo_config::FixoConfig;
use fixo_core::{FixoError, Identity, StorageAdapter};
use fixo_engine::{LocalBackend, SessionOrchestrator};
use fixo_rtc::{MediaDevices, PeerConnectionFactory};
use fixo_storage::{FsBlobStore, SqliteStorage};

use crate::mock_media::MockMediaDevices;
use crate::mock_peer::MockPeerFactory;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: FixoConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = FixoConfig::default();
        // fast negotiation polling for tests
        config.rtc.stable_poll_initial_ms = 5;
        config.rtc.stable_poll_max_ms = 20;
        config.rtc.stable_timeout_secs = 2;
        config.rtc.media_prompt_timeout_secs = 1;
        Self { config }
    }

    /// Adjust the configuration before the stack is built.
    pub fn with_config(mut self, edit: impl FnOnce(&mut FixoConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, FixoError> {
        let mut config = self.config;
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| FixoError::Storage { source: e.into() })?;
        config.storage.database_path = temp_dir.path().join("test.db").to_string_lossy().into();
        config.blobs.root_dir = temp_dir.path().join("blobs").to_string_lossy().into();

        let storage = SqliteStorage::new(config.storage.clone());
        storage.initialize().await?;
        let db = storage.database()?.clone();

        let blobs = Arc::new(FsBlobStore::with_ephemeral_key(
            &config.blobs,
            "http://fixo.test",
        ));
        let feed = ChangeFeed::default();
        let backend = Arc::new(LocalBackend::new(db, feed.clone(), blobs.clone(), &config));

        Ok(TestHarness {
            config,
            storage,
            feed,
            blobs,
            backend,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete in-process support stack for tests.
pub struct TestHarness {
    pub config: FixoConfig,
    pub storage: SqliteStorage,
    pub feed: ChangeFeed,
    pub blobs: Arc<FsBlobStore>,
    pub backend: Arc<LocalBackend>,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default test settings.
    pub async fn new() -> Result<Self, FixoError> {
        Self::builder().build().await
    }

    pub fn student(user_id: &str) -> Identity {
        Identity::student(user_id)
    }

    pub fn admin(user_id: &str) -> Identity {
        Identity::admin(user_id)
    }

    /// Orchestrator with mock capture that grants every prompt.
    pub fn orchestrator(
        &self,
        identity: Identity,
        factory: Arc<MockPeerFactory>,
    ) -> SessionOrchestrator<LocalBackend> {
        self.orchestrator_with(
            identity,
            factory,
            Arc::new(MockMediaDevices::new()),
            DeviceBus::default(),
        )
    }

    pub fn orchestrator_with(
        &self,
        identity: Identity,
        factory: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaDevices>,
        device: DeviceBus,
    ) -> SessionOrchestrator<LocalBackend> {
        SessionOrchestrator::builder(identity, Arc::clone(&self.backend), factory)
            .rtc_config(self.config.rtc.clone())
            .media(media)
            .device_bus(device)
            .build()
    }
}

/// Polls `check` until it holds or five seconds pass. Returns the last result.
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
