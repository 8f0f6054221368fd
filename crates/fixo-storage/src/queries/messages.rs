// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat message log. Rows are append-only; only the read receipt changes.

use fixo_core::types::now_iso;
use fixo_core::{FixoError, Message, MessageType, NewMessage};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::queries::parse_column;

const COLUMNS: &str =
    "id, session_id, sender_id, message, message_type, file_url, created_at, read_at, read_by";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sender_id: row.get(2)?,
        message: row.get(3)?,
        message_type: parse_column(row, 4)?,
        file_url: row.get(5)?,
        created_at: row.get(6)?,
        read_at: row.get(7)?,
        read_by: row.get(8)?,
    })
}

pub(crate) fn system_message(session_id: &str, sender_id: &str, text: &str, now: &str) -> Message {
    Message {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        sender_id: sender_id.to_string(),
        message: text.to_string(),
        message_type: MessageType::System,
        file_url: None,
        created_at: now.to_string(),
        read_at: None,
        read_by: None,
    }
}

pub(crate) fn insert_row(conn: &rusqlite::Connection, msg: &Message) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT INTO chat_messages ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
        params![
            msg.id,
            msg.session_id,
            msg.sender_id,
            msg.message,
            msg.message_type.to_string(),
            msg.file_url,
            msg.created_at,
            msg.read_at,
            msg.read_by,
        ],
    )?;
    Ok(())
}

/// Persist a message that already passed [`NewMessage::validate`].
pub async fn insert_message(
    db: &Database,
    sender_id: &str,
    new: NewMessage,
) -> Result<Message, FixoError> {
    let msg = Message {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: new.session_id,
        sender_id: sender_id.to_string(),
        message: new.message,
        message_type: new.message_type,
        file_url: new.file_url,
        created_at: now_iso(),
        read_at: None,
        read_by: None,
    };
    let row = msg.clone();
    db.connection()
        .call(move |conn| insert_row(conn, &row))
        .await
        .map_err(map_tr_err)?;
    Ok(msg)
}

/// Full history of a session in commit order.
pub async fn get_messages(db: &Database, session_id: &str) -> Result<Vec<Message>, FixoError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM chat_messages WHERE session_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![session_id], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_message(db: &Database, id: &str) -> Result<Option<Message>, FixoError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM chat_messages WHERE id = ?1"),
                params![id],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Set the read receipt on one message from someone other than `reader`.
///
/// Returns `false` when nothing changed (already read, or own message).
pub async fn mark_read(db: &Database, message_id: &str, reader: &str) -> Result<bool, FixoError> {
    let id = message_id.to_string();
    let reader = reader.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE chat_messages SET read_at = ?1, read_by = ?2
                 WHERE id = ?3 AND read_at IS NULL AND sender_id <> ?2",
                params![now_iso(), reader, id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed > 0)
}

/// Mark every unread message in a session not sent by `reader`.
pub async fn mark_session_read(
    db: &Database,
    session_id: &str,
    reader: &str,
) -> Result<u64, FixoError> {
    let session_id = session_id.to_string();
    let reader = reader.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE chat_messages SET read_at = ?1, read_by = ?2
                 WHERE session_id = ?3 AND read_at IS NULL AND sender_id <> ?2",
                params![now_iso(), reader, session_id],
            )
        })
        .await
        .map_err(map_tr_err)?;
    Ok(changed as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::sessions::{create_session, list_conversations};
    use fixo_core::{NewSession, Role};
    use tempfile::tempdir;

    async fn setup() -> (Database, String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("m.db").to_str().unwrap())
            .await
            .unwrap();
        let s = create_session(&db, NewSession::direct("stu", "adm")).await.unwrap();
        (db, s.id, dir)
    }

    #[tokio::test]
    async fn messages_come_back_in_insertion_order() {
        let (db, sid, _dir) = setup().await;
        for text in ["one", "two", "three"] {
            let msg = NewMessage::text(&sid, text).validate().unwrap();
            insert_message(&db, "stu", msg).await.unwrap();
        }
        let all = get_messages(&db, &sid).await.unwrap();
        let texts: Vec<_> = all.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn schema_rejects_file_message_without_url() {
        let (db, sid, _dir) = setup().await;
        let bad = NewMessage {
            session_id: sid,
            message: "Shared file: x.png".into(),
            message_type: MessageType::File,
            file_url: None,
        };
        assert!(insert_message(&db, "stu", bad).await.is_err());
    }

    #[tokio::test]
    async fn read_receipts_skip_own_messages_and_are_idempotent() {
        let (db, sid, _dir) = setup().await;
        let from_student = insert_message(&db, "stu", NewMessage::text(&sid, "hi"))
            .await
            .unwrap();
        insert_message(&db, "adm", NewMessage::text(&sid, "hello"))
            .await
            .unwrap();

        assert!(!mark_read(&db, &from_student.id, "stu").await.unwrap());
        assert!(mark_read(&db, &from_student.id, "adm").await.unwrap());
        assert!(!mark_read(&db, &from_student.id, "adm").await.unwrap());

        let read = get_message(&db, &from_student.id).await.unwrap().unwrap();
        assert_eq!(read.read_by.as_deref(), Some("adm"));
        assert!(read.read_at.is_some());

        assert_eq!(mark_session_read(&db, &sid, "stu").await.unwrap(), 1);
        assert_eq!(mark_session_read(&db, &sid, "stu").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conversations_report_unread_counts() {
        let (db, sid, _dir) = setup().await;
        insert_message(&db, "adm", NewMessage::text(&sid, "ping"))
            .await
            .unwrap();
        insert_message(&db, "adm", NewMessage::text(&sid, "ping again"))
            .await
            .unwrap();

        let list = list_conversations(&db, "stu", Role::Student).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].unread_count, 2);
        assert_eq!(list[0].last_message.as_deref(), Some("ping again"));

        let for_admin = list_conversations(&db, "adm", Role::Admin).await.unwrap();
        assert_eq!(for_admin[0].unread_count, 0);

        mark_session_read(&db, &sid, "stu").await.unwrap();
        let list = list_conversations(&db, "stu", Role::Student).await.unwrap();
        assert_eq!(list[0].unread_count, 0);
    }
}
