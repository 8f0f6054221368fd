// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Fixo integration tests.
//!
//! Provides mock capture devices, a scripted peer connection and a harness
//! wiring a temp SQLite database into a [`LocalBackend`], so session and
//! call flows run deterministically without a browser or network.
//!
//! # Components
//!
//! - [`MockMediaDevices`] - capture that grants, denies or never answers
//! - [`MockPeerFactory`] - peer connections with a simulated signaling state
//! - [`TestHarness`] - backend, feed and blob store over a temp directory
//!
//! [`LocalBackend`]: fixo_engine::LocalBackend

pub mod harness;
pub mod mock_media;
pub mod mock_peer;

pub use harness::{TestHarness, TestHarnessBuilder, wait_for};
pub use mock_media::{CaptureMode, MockMediaDevices};
pub use mock_peer::{MockPeerConnection, MockPeerFactory};
