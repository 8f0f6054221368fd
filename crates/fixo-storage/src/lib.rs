// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Fixo live support engine.
//!
//! WAL-mode SQLite with embedded migrations and a single-writer connection
//! via `tokio-rusqlite`, typed queries for sessions, messages and signal
//! envelopes, and a filesystem attachment store.

pub mod adapter;
pub mod blob;
pub mod database;
pub mod migrations;
pub mod queries;

pub use adapter::SqliteStorage;
pub use blob::{FsBlobStore, attachment_path};
pub use database::Database;
pub use queries::sessions::EndOutcome;
