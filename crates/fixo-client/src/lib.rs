// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote access to a Fixo gateway.
//!
//! [`RemoteBackend`] implements the session store, message channel and
//! signaling relay traits over the gateway's REST routes, with one
//! WebSocket per live subscription, so a session orchestrator runs the
//! same way against a remote server as against the in-process backend.

mod remote;
mod subscribe;

pub use remote::{RemoteBackend, token_identity};
