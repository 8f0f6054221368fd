// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session orchestration for the Fixo live support engine.
//!
//! [`LocalBackend`] implements the session store, message channel and
//! signaling relay over SQLite and the in-process change feed.
//! [`SessionOrchestrator`] is the per-user controller that ties a backend to
//! a peer connection manager and exposes one observable state.

pub mod backend;
pub mod orchestrator;
pub mod pruner;

pub use backend::LocalBackend;
pub use orchestrator::{OrchestratorBuilder, OrchestratorState, SessionOrchestrator};
pub use pruner::{prune_once, spawn_signal_pruner};
