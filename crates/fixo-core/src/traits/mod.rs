// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions for adapters and the live support backend.
//!
//! All traits use `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod backend;
pub mod blob;
pub mod storage;

pub use adapter::PluginAdapter;
pub use backend::{MessageChannel, SessionStore, SignalRelay, SupportBackend};
pub use blob::BlobStore;
pub use storage::StorageAdapter;
