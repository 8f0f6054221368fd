// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Races on the session state machine.

use fixo_core::{FixoError, NewSession, SessionStatus};
use fixo_storage::queries::{messages, sessions};
use fixo_storage::{Database, EndOutcome};
use tempfile::tempdir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_admin_wins_a_join_race() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("race.db").to_str().unwrap())
        .await
        .unwrap();
    let session = sessions::create_session(&db, NewSession::queued("stu-1"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for n in 0..8 {
        let db = db.clone();
        let id = session.id.clone();
        handles.push(tokio::spawn(async move {
            sessions::join_session(&db, &id, &format!("adm-{n}")).await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok((s, _)) => winners.push(s.admin_id.unwrap()),
            Err(FixoError::InvalidTransition { from, .. }) => {
                assert_eq!(from, SessionStatus::Active)
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let stored = sessions::get_session(&db, &session.id).await.unwrap().unwrap();
    assert_eq!(stored.admin_id.as_ref(), winners.first());
    stored.check_invariants().unwrap();

    let notices = messages::get_messages(&db, &session.id).await.unwrap();
    assert_eq!(notices.len(), 1, "exactly one join notice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_end_records_one_notice() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("end.db").to_str().unwrap())
        .await
        .unwrap();
    let session = sessions::create_session(&db, NewSession::direct("stu-1", "adm-1"))
        .await
        .unwrap();

    let a = {
        let db = db.clone();
        let id = session.id.clone();
        tokio::spawn(async move { sessions::end_session(&db, &id, "stu-1").await })
    };
    let b = {
        let db = db.clone();
        let id = session.id.clone();
        tokio::spawn(async move { sessions::end_session(&db, &id, "adm-1").await })
    };
    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    let transitions = outcomes
        .iter()
        .filter(|o| matches!(o, EndOutcome::Ended { .. }))
        .count();
    assert_eq!(transitions, 1);

    let notices = messages::get_messages(&db, &session.id).await.unwrap();
    assert_eq!(notices.len(), 1);
}
