// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session, message and signal flows through the local backend.
//!
//! Each test builds an isolated TestHarness with a temp SQLite database and
//! blob directory. Tests are independent and order-insensitive.

use std::time::Duration;

use fixo_core::types::{ADMIN_JOINED_TEXT, SESSION_ENDED_TEXT};
use fixo_core::{
    ChangeKind, FixoError, MessageChannel, MessageType, NewMessage, NewSession, NewSignal,
    SessionStatus, SessionStore, SignalRelay, SignalType,
};
use fixo_engine::prune_once;
use fixo_test_utils::TestHarness;

async fn harness() -> TestHarness {
    TestHarness::new().await.unwrap()
}

// ---- Queue and direct creation ----

#[tokio::test]
async fn queued_session_is_joined_by_an_admin() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let admin = TestHarness::admin("adm-1");

    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Waiting);
    assert_eq!(session.admin_id, None);

    let queue = h.backend.fetch_waiting(&admin).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, session.id);

    let joined = h.backend.join_session(&admin, &session.id).await.unwrap();
    assert_eq!(joined.status, SessionStatus::Active);
    assert_eq!(joined.admin_id.as_deref(), Some("adm-1"));
    assert!(joined.started_at.is_some());

    let history = h.backend.fetch_messages(&student, &session.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message_type, MessageType::System);
    assert_eq!(history[0].message, ADMIN_JOINED_TEXT);
    assert_eq!(history[0].sender_id, "adm-1");

    assert!(h.backend.fetch_waiting(&admin).await.unwrap().is_empty());
}

#[tokio::test]
async fn direct_session_never_waits() {
    let h = harness().await;
    let admin = TestHarness::admin("adm-1");
    let mut feed = h.backend.subscribe_sessions(&admin).await.unwrap();

    let session = h
        .backend
        .create_session(&admin, NewSession::direct("stu-9", "adm-1"))
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.student_id, "stu-9");
    assert_eq!(session.admin_id.as_deref(), Some("adm-1"));

    let change = tokio::time::timeout(Duration::from_secs(2), feed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.kind, ChangeKind::Insert);
    assert_eq!(change.session.status, SessionStatus::Active);

    let student = TestHarness::student("stu-9");
    let active = h.backend.fetch_active(&student).await.unwrap().unwrap();
    assert_eq!(active.id, session.id);
}

#[tokio::test]
async fn a_student_has_one_open_session_at_a_time() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    h.backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();
    let second = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await;
    assert!(matches!(second, Err(FixoError::Conflict(_))));
}

#[tokio::test]
async fn joining_twice_is_rejected() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();
    h.backend
        .join_session(&TestHarness::admin("adm-1"), &session.id)
        .await
        .unwrap();

    let late = h
        .backend
        .join_session(&TestHarness::admin("adm-2"), &session.id)
        .await;
    assert!(matches!(
        late,
        Err(FixoError::InvalidTransition {
            from: SessionStatus::Active,
            ..
        })
    ));

    let by_student = h.backend.join_session(&student, &session.id).await;
    assert!(matches!(by_student, Err(FixoError::Forbidden(_))));
}

// ---- Messages ----

#[tokio::test]
async fn text_message_is_stored_trimmed() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();

    h.backend
        .send_message(&student, NewMessage::text(&session.id, "  Wifi not working "))
        .await
        .unwrap();

    let history = h.backend.fetch_messages(&student, &session.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message_type, MessageType::Text);
    assert_eq!(history[0].message, "Wifi not working");
    assert_eq!(history[0].sender_id, "stu-1");
}

#[tokio::test]
async fn outsiders_cannot_read_or_write() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();
    h.backend
        .join_session(&TestHarness::admin("adm-1"), &session.id)
        .await
        .unwrap();

    let stranger = TestHarness::student("stu-2");
    let other_admin = TestHarness::admin("adm-2");
    assert!(matches!(
        h.backend.fetch_messages(&stranger, &session.id).await,
        Err(FixoError::Forbidden(_))
    ));
    assert!(matches!(
        h.backend
            .send_message(&other_admin, NewMessage::text(&session.id, "hi"))
            .await,
        Err(FixoError::Forbidden(_))
    ));
    assert!(matches!(
        h.backend.subscribe_signals(&other_admin, &session.id).await,
        Err(FixoError::Forbidden(_))
    ));
}

#[tokio::test]
async fn subscribers_see_messages_and_read_receipts_stick() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let admin = TestHarness::admin("adm-1");
    let session = h
        .backend
        .create_session(&admin, NewSession::direct("stu-1", "adm-1"))
        .await
        .unwrap();
    let mut inbox = h
        .backend
        .subscribe_messages(&student, &session.id)
        .await
        .unwrap();

    let sent = h
        .backend
        .send_message(&admin, NewMessage::text(&session.id, "Try restarting the router"))
        .await
        .unwrap();
    let received = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.id, sent.id);

    assert!(h.backend.mark_read(&student, &sent.id).await.unwrap());
    // own messages and already-read messages are left alone
    assert!(!h.backend.mark_read(&student, &sent.id).await.unwrap());
    assert_eq!(
        h.backend
            .mark_session_read(&admin, &session.id)
            .await
            .unwrap(),
        0
    );

    let stored = h.backend.fetch_messages(&admin, &session.id).await.unwrap();
    assert_eq!(stored[0].read_by.as_deref(), Some("stu-1"));
    assert!(stored[0].read_at.is_some());
}

#[tokio::test]
async fn clients_cannot_forge_system_messages() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();
    let mut forged = NewMessage::text(&session.id, ADMIN_JOINED_TEXT);
    forged.message_type = MessageType::System;
    assert!(matches!(
        h.backend.send_message(&student, forged).await,
        Err(FixoError::Validation(_))
    ));
}

// ---- Ending ----

#[tokio::test]
async fn ending_closes_the_session_for_both_sides() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let admin = TestHarness::admin("adm-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();
    h.backend.join_session(&admin, &session.id).await.unwrap();

    let ended = h.backend.end_session(&student, &session.id).await.unwrap();
    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(ended.ended_at.is_some());

    let history = h.backend.fetch_messages(&admin, &session.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.message_type, MessageType::System);
    assert_eq!(last.message, SESSION_ENDED_TEXT);

    assert!(h.backend.fetch_active(&student).await.unwrap().is_none());
    assert!(h.backend.fetch_active(&admin).await.unwrap().is_none());

    // ending again changes nothing
    let again = h.backend.end_session(&admin, &session.id).await.unwrap();
    assert_eq!(again.ended_at, ended.ended_at);
    let notices = h
        .backend
        .fetch_messages(&admin, &session.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.message == SESSION_ENDED_TEXT)
        .count();
    assert_eq!(notices, 1);

    let late = h
        .backend
        .send_message(&student, NewMessage::text(&session.id, "one more thing"))
        .await;
    assert!(matches!(
        late,
        Err(FixoError::InvalidTransition {
            from: SessionStatus::Ended,
            ..
        })
    ));
}

#[tokio::test]
async fn admins_can_drop_a_queued_session() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();
    let ended = h
        .backend
        .end_session(&TestHarness::admin("adm-7"), &session.id)
        .await
        .unwrap();
    assert_eq!(ended.status, SessionStatus::Ended);
    assert_eq!(ended.admin_id, None);
}

// ---- Attachments ----

#[tokio::test]
async fn uploads_land_under_the_session_and_get_signed_links() {
    let h = harness().await;
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();

    let attachment = h
        .backend
        .upload(&student, &session.id, "screenshot.png", vec![1, 2, 3])
        .await
        .unwrap();
    assert!(attachment.path.starts_with(&format!("{}/", session.id)));
    assert!(attachment.path.ends_with(".png"));
    assert!(attachment.url.contains("sig="));

    let url = h
        .backend
        .access_url(&student, &attachment.path)
        .await
        .unwrap();
    assert!(url.starts_with("http://fixo.test/files/"));

    let outsider = h
        .backend
        .access_url(&TestHarness::student("stu-2"), &attachment.path)
        .await;
    assert!(matches!(outsider, Err(FixoError::Forbidden(_))));
}

#[tokio::test]
async fn uploads_are_size_checked() {
    let h = TestHarness::builder()
        .with_config(|c| c.blobs.max_upload_bytes = 4)
        .build()
        .await
        .unwrap();
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&student, NewSession::queued("stu-1"))
        .await
        .unwrap();

    let too_big = h
        .backend
        .upload(&student, &session.id, "log.txt", vec![0; 5])
        .await;
    assert!(matches!(too_big, Err(FixoError::Validation(_))));
    let empty = h.backend.upload(&student, &session.id, "log.txt", vec![]).await;
    assert!(matches!(empty, Err(FixoError::Validation(_))));
}

// ---- Signals ----

#[tokio::test]
async fn signals_reach_the_session_subscribers() {
    let h = harness().await;
    let admin = TestHarness::admin("adm-1");
    let student = TestHarness::student("stu-1");
    let session = h
        .backend
        .create_session(&admin, NewSession::direct("stu-1", "adm-1"))
        .await
        .unwrap();
    let mut relay = h
        .backend
        .subscribe_signals(&student, &session.id)
        .await
        .unwrap();

    let sent = h
        .backend
        .send_signal(
            &admin,
            NewSignal {
                session_id: session.id.clone(),
                signal_type: SignalType::Offer,
                signal_data: serde_json::json!({"type": "offer", "sdp": "v=0"}),
            },
        )
        .await
        .unwrap();
    let envelope = tokio::time::timeout(Duration::from_secs(2), relay.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.id, sent.id);
    assert_eq!(envelope.sender_id, "adm-1");
    assert_eq!(envelope.signal_type, SignalType::Offer);
}

#[tokio::test]
async fn expired_signals_are_pruned() {
    let h = harness().await;
    let admin = TestHarness::admin("adm-1");
    let session = h
        .backend
        .create_session(&admin, NewSession::direct("stu-1", "adm-1"))
        .await
        .unwrap();
    for _ in 0..3 {
        h.backend
            .send_signal(
                &admin,
                NewSignal {
                    session_id: session.id.clone(),
                    signal_type: SignalType::IceCandidate,
                    signal_data: serde_json::json!({"candidate": "candidate:1"}),
                },
            )
            .await
            .unwrap();
    }

    let db = h.storage.database().unwrap();
    assert_eq!(prune_once(db, Duration::from_secs(3600)).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(prune_once(db, Duration::ZERO).await.unwrap(), 3);
}
