// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session state machine persistence.
//!
//! Every transition is a single conditional UPDATE inside a transaction, so
//! two admins racing to join the same waiting session cannot both win.

use fixo_core::types::{ADMIN_JOINED_TEXT, SESSION_ENDED_TEXT, now_iso};
use fixo_core::{
    ConversationSummary, FixoError, Message, NewSession, Role, Session,
    SessionStatus,
};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::queries::messages::{insert_row as insert_message_row, system_message};
use crate::queries::{is_constraint_violation, parse_column};

const COLUMNS: &str = "id, student_id, admin_id, status, complaint_id, initiator, \
                       created_at, started_at, ended_at, updated_at";

const PREFIXED_COLUMNS: &str = "s.id, s.student_id, s.admin_id, s.status, s.complaint_id, \
                                s.initiator, s.created_at, s.started_at, s.ended_at, s.updated_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        student_id: row.get(1)?,
        admin_id: row.get(2)?,
        status: parse_column(row, 3)?,
        complaint_id: row.get(4)?,
        initiator: parse_column(row, 5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        ended_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn select(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Session>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM chat_sessions WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
}

/// Result of [`end_session`].
#[derive(Debug, Clone)]
pub enum EndOutcome {
    /// The session moved to `ended`; `notice` is the recorded system message.
    Ended { session: Session, notice: Message },
    /// It had already ended. Nothing was written.
    AlreadyEnded(Session),
}

enum Create {
    Created(Session),
    /// The student's open session id, when the pre-check found it.
    Busy(Option<String>),
}

enum Transition {
    Done(Session, Message),
    Missing,
    Rejected(Session),
}

/// Insert a session.
///
/// Rejected with `Conflict` if the student already has a non-ended session.
pub async fn create_session(db: &Database, request: NewSession) -> Result<Session, FixoError> {
    let student_id = request.student_id.clone();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Create, rusqlite::Error> {
            let tx = conn.transaction()?;
            let open: Option<String> = tx
                .query_row(
                    "SELECT id FROM chat_sessions WHERE student_id = ?1 AND status <> 'ended'
                     ORDER BY created_at DESC LIMIT 1",
                    params![request.student_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(id) = open {
                return Ok(Create::Busy(Some(id)));
            }

            let now = now_iso();
            let initiator = request.initiator();
            let (status, started_at) = match request.admin_id {
                Some(_) => (SessionStatus::Active, Some(now.clone())),
                None => (SessionStatus::Waiting, None),
            };
            let session = Session {
                id: uuid::Uuid::new_v4().to_string(),
                student_id: request.student_id,
                admin_id: request.admin_id,
                status,
                complaint_id: request.complaint_id,
                initiator,
                created_at: now.clone(),
                started_at,
                ended_at: None,
                updated_at: now,
            };
            let inserted = tx.execute(
                &format!("INSERT INTO chat_sessions ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    session.id,
                    session.student_id,
                    session.admin_id,
                    session.status.to_string(),
                    session.complaint_id,
                    session.initiator.to_string(),
                    session.created_at,
                    session.started_at,
                    session.ended_at,
                    session.updated_at,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Ok(Create::Busy(None));
                }
                Err(e) => return Err(e),
            }
            tx.commit()?;
            Ok(Create::Created(session))
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        Create::Created(session) => Ok(session),
        Create::Busy(Some(existing)) => Err(FixoError::Conflict(format!(
            "student {student_id} already has an open session ({existing})"
        ))),
        Create::Busy(None) => Err(FixoError::Conflict(format!(
            "student {student_id} already has an open session"
        ))),
    }
}

/// Bind `admin_id` to a waiting session and activate it.
///
/// Also records the "Admin has joined the chat" system message in the same
/// transaction. Returns the updated session and that message.
pub async fn join_session(
    db: &Database,
    session_id: &str,
    admin_id: &str,
) -> Result<(Session, Message), FixoError> {
    let id = session_id.to_string();
    let admin = admin_id.to_string();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Transition, rusqlite::Error> {
            let tx = conn.transaction()?;
            let now = now_iso();
            let changed = tx.execute(
                "UPDATE chat_sessions
                 SET status = 'active', admin_id = ?1, started_at = ?2, updated_at = ?2
                 WHERE id = ?3 AND status = 'waiting'",
                params![admin, now, id],
            )?;
            if changed == 0 {
                return Ok(match select(&tx, &id)? {
                    Some(current) => Transition::Rejected(current),
                    None => Transition::Missing,
                });
            }
            let notice = system_message(&id, &admin, ADMIN_JOINED_TEXT, &now);
            insert_message_row(&tx, &notice)?;
            let session = select(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Transition::Done(session, notice))
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        Transition::Done(session, notice) => Ok((session, notice)),
        Transition::Missing => Err(FixoError::NotFound(format!("session {session_id}"))),
        Transition::Rejected(current) => Err(FixoError::InvalidTransition {
            session_id: current.id,
            from: current.status,
            action: "join".into(),
        }),
    }
}

/// Move a session to `ended`, recording "Chat session has ended" authored by
/// `actor_id`. Ending an ended session writes nothing.
pub async fn end_session(
    db: &Database,
    session_id: &str,
    actor_id: &str,
) -> Result<EndOutcome, FixoError> {
    let id = session_id.to_string();
    let actor = actor_id.to_string();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Transition, rusqlite::Error> {
            let tx = conn.transaction()?;
            let now = now_iso();
            let changed = tx.execute(
                "UPDATE chat_sessions SET status = 'ended', ended_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status <> 'ended'",
                params![now, id],
            )?;
            if changed == 0 {
                return Ok(match select(&tx, &id)? {
                    Some(current) => Transition::Rejected(current),
                    None => Transition::Missing,
                });
            }
            let notice = system_message(&id, &actor, SESSION_ENDED_TEXT, &now);
            insert_message_row(&tx, &notice)?;
            let session = select(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
            tx.commit()?;
            Ok(Transition::Done(session, notice))
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        Transition::Done(session, notice) => Ok(EndOutcome::Ended { session, notice }),
        Transition::Rejected(current) => Ok(EndOutcome::AlreadyEnded(current)),
        Transition::Missing => Err(FixoError::NotFound(format!("session {session_id}"))),
    }
}

/// Get a session by ID.
pub async fn get_session(db: &Database, id: &str) -> Result<Option<Session>, FixoError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select(conn, &id))
        .await
        .map_err(map_tr_err)
}

/// Most recent non-ended session visible to the user.
///
/// Students see their own; admins see the ones bound to them plus every
/// waiting session.
pub async fn fetch_active(
    db: &Database,
    user_id: &str,
    role: Role,
) -> Result<Option<Session>, FixoError> {
    let user = user_id.to_string();
    let filter = participant_filter(role, "");
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM chat_sessions
                     WHERE {filter} AND status <> 'ended'
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![user],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All waiting sessions, oldest first.
pub async fn fetch_waiting(db: &Database) -> Result<Vec<Session>, FixoError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM chat_sessions WHERE status = 'waiting'
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Sessions visible to the user with the last message and the number of
/// messages from the other side still unread, most recent activity first.
pub async fn list_conversations(
    db: &Database,
    user_id: &str,
    role: Role,
) -> Result<Vec<ConversationSummary>, FixoError> {
    let user = user_id.to_string();
    let filter = participant_filter(role, "s.");
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM (
                    SELECT {PREFIXED_COLUMNS},
                        (SELECT m.message FROM chat_messages m WHERE m.session_id = s.id
                         ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1) AS last_message,
                        (SELECT MAX(m.created_at) FROM chat_messages m
                         WHERE m.session_id = s.id) AS last_message_at,
                        (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.id
                         AND m.read_at IS NULL AND m.sender_id <> ?1) AS unread
                    FROM chat_sessions s WHERE {filter}
                 ) ORDER BY max(updated_at, COALESCE(last_message_at, '')) DESC"
            ))?;
            let rows = stmt.query_map(params![user], |row| {
                let unread: i64 = row.get(12)?;
                Ok(ConversationSummary {
                    session: from_row(row)?,
                    last_message: row.get(10)?,
                    last_message_at: row.get(11)?,
                    unread_count: unread.max(0) as u64,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// WHERE fragment selecting the rows a user participates in (`?1` = user id).
fn participant_filter(role: Role, prefix: &str) -> String {
    match role {
        Role::Student => format!("{prefix}student_id = ?1"),
        Role::Admin => format!("({prefix}admin_id = ?1 OR {prefix}status = 'waiting')"),
    }
}
