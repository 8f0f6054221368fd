// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All reads and writes go through one `tokio_rusqlite::Connection`, whose
//! background thread serializes every closure. Query modules take
//! `&Database` and never open their own connection.

use std::path::Path;

use fixo_core::FixoError;
use tracing::debug;

use crate::migrations::run_migrations;

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;";

/// Handle to the single SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path` with WAL enabled and
    /// migrations applied.
    pub async fn open(path: &str) -> Result<Self, FixoError> {
        Self::open_with(path, true).await
    }

    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, FixoError> {
        let owned = path.to_string();
        tokio::task::spawn_blocking(move || prepare_file(&owned, wal_mode))
            .await
            .map_err(|e| FixoError::Internal(format!("migration task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| FixoError::Storage {
                source: Box::new(e),
            })?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(CONNECTION_PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL so the main file is self-contained.
    pub async fn checkpoint(&self) -> Result<(), FixoError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Creates parent directories, sets the journal mode and migrates.
fn prepare_file(path: &str, wal_mode: bool) -> Result<(), FixoError> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| FixoError::Storage {
            source: Box::new(e),
        })?;
    }

    let mut conn = rusqlite::Connection::open(path).map_err(|e| FixoError::Storage {
        source: Box::new(e),
    })?;
    let journal = if wal_mode { "WAL" } else { "DELETE" };
    conn.pragma_update_and_check(None, "journal_mode", journal, |row| row.get::<_, String>(0))
        .and_then(|_| conn.execute_batch(CONNECTION_PRAGMAS))
        .map_err(|e| FixoError::Storage {
            source: Box::new(e),
        })?;
    run_migrations(&mut conn)
}

/// Map a tokio-rusqlite error into the workspace error type.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> FixoError {
    FixoError::Storage {
        source: Box::new(e),
    }
}
