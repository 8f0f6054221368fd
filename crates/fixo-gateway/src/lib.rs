// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway over a [`SupportBackend`].
//!
//! Remote clients reach the session store, message channel and signaling
//! relay through `/v1` REST routes and receive pushed changes over `/ws`.
//! Attachments are served from `/files/{path}` behind signed links.
//!
//! [`SupportBackend`]: fixo_core::SupportBackend

pub mod auth;
pub mod handlers;
pub mod server;
pub mod ws;

pub use auth::{AuthConfig, TokenSigner};
pub use server::{GatewayState, build_router, serve, start_server};
