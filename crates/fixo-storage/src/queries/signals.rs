// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebRTC signal envelopes.
//!
//! Envelopes only matter while a negotiation is in flight; they are pruned
//! by age and purged when their session ends.

use fixo_core::types::now_iso;
use fixo_core::{FixoError, NewSignal, SignalEnvelope};
use rusqlite::params;

use crate::database::{Database, map_tr_err};
use crate::queries::parse_column;

const COLUMNS: &str = "id, session_id, sender_id, signal_type, signal_data, created_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalEnvelope> {
    let data: String = row.get(4)?;
    Ok(SignalEnvelope {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sender_id: row.get(2)?,
        signal_type: parse_column(row, 3)?,
        signal_data: serde_json::from_str(&data).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: row.get(5)?,
    })
}

pub async fn insert_signal(
    db: &Database,
    sender_id: &str,
    signal: NewSignal,
) -> Result<SignalEnvelope, FixoError> {
    let payload = serde_json::to_string(&signal.signal_data).map_err(|e| FixoError::Storage {
        source: Box::new(e),
    })?;
    let envelope = SignalEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: signal.session_id,
        sender_id: sender_id.to_string(),
        signal_type: signal.signal_type,
        signal_data: signal.signal_data,
        created_at: now_iso(),
    };
    let row = envelope.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                &format!("INSERT INTO webrtc_signals ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                params![
                    row.id,
                    row.session_id,
                    row.sender_id,
                    row.signal_type.to_string(),
                    payload,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    Ok(envelope)
}

/// Envelopes still stored for a session, oldest first.
pub async fn list_signals(
    db: &Database,
    session_id: &str,
) -> Result<Vec<SignalEnvelope>, FixoError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM webrtc_signals WHERE session_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![session_id], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Delete envelopes created before `cutoff` (same ISO-8601 format as rows).
pub async fn prune_signals(db: &Database, cutoff: &str) -> Result<u64, FixoError> {
    let cutoff = cutoff.to_string();
    let removed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM webrtc_signals WHERE created_at < ?1",
                params![cutoff],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(removed as u64)
}

/// Delete every envelope of one session.
pub async fn purge_session_signals(db: &Database, session_id: &str) -> Result<u64, FixoError> {
    let session_id = session_id.to_string();
    let removed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM webrtc_signals WHERE session_id = ?1",
                params![session_id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(removed as u64)
}
