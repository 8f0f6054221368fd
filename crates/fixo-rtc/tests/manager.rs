// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Peer connection manager negotiation over the local signaling relay.

use std::sync::Arc;
use std::time::Duration;

use fixo_core::{FixoError, Identity, NewSession, NewSignal, SessionStore, SignalRelay, SignalType};
use fixo_rtc::{
    IceConnectionState, MediaDevices, MediaKind, PeerConnection, PeerConnectionFactory,
    PeerConnectionManager, PeerEvent, RtcEvent, RtcServices, SignalingState,
};
use fixo_test_utils::{CaptureMode, MockMediaDevices, MockPeerFactory, TestHarness, wait_for};

struct Call {
    harness: TestHarness,
    admin: PeerConnectionManager,
    student: PeerConnectionManager,
    admin_factory: Arc<MockPeerFactory>,
    student_factory: Arc<MockPeerFactory>,
    admin_media: Arc<MockMediaDevices>,
    session_id: String,
}

fn manager(
    h: &TestHarness,
    identity: Identity,
    session_id: &str,
    initiator: bool,
    factory: Arc<dyn PeerConnectionFactory>,
    media: Arc<dyn MediaDevices>,
) -> PeerConnectionManager {
    PeerConnectionManager::new(
        session_id,
        identity,
        initiator,
        h.config.rtc.clone(),
        RtcServices {
            relay: h.backend.clone(),
            media,
            factory,
        },
    )
}

/// A direct session: the admin created it, so the admin initiates.
async fn call_with(harness: TestHarness) -> Call {
    let admin_id = TestHarness::admin("adm-1");
    let session = harness
        .backend
        .create_session(&admin_id, NewSession::direct("stu-1", "adm-1"))
        .await
        .unwrap();

    let admin_factory = MockPeerFactory::shared();
    let student_factory = MockPeerFactory::shared();
    let admin_media = MockMediaDevices::shared(CaptureMode::Grant);
    let admin = manager(
        &harness,
        admin_id,
        &session.id,
        true,
        admin_factory.clone(),
        admin_media.clone(),
    );
    let student = manager(
        &harness,
        TestHarness::student("stu-1"),
        &session.id,
        false,
        student_factory.clone(),
        MockMediaDevices::shared(CaptureMode::Grant),
    );
    admin.initialize().await.unwrap();
    student.initialize().await.unwrap();

    Call {
        harness,
        admin,
        student,
        admin_factory,
        student_factory,
        admin_media,
        session_id: session.id,
    }
}

async fn call() -> Call {
    call_with(TestHarness::new().await.unwrap()).await
}

impl Call {
    async fn settled(&self) -> bool {
        let admin_pc = self.admin_factory.last().unwrap();
        let student_pc = self.student_factory.last().unwrap();
        wait_for(|| {
            admin_pc.signaling_state() == SignalingState::Stable
                && student_pc.signaling_state() == SignalingState::Stable
                && student_pc.answers().len() == admin_pc.offers().len()
        })
        .await
    }
}

#[tokio::test]
async fn audio_after_screen_share_renegotiates_once_when_stable() {
    let call = call().await;
    let admin_pc = call.admin_factory.last().unwrap();

    call.admin.start_screen_share().await.unwrap();
    assert_eq!(admin_pc.offers().len(), 1);
    assert!(call.settled().await);

    // hold a negotiation open on the initiator
    admin_pc.set_signaling_state(SignalingState::HaveLocalOffer);
    let admin = Arc::new(call.admin);
    let task = tokio::spawn({
        let admin = Arc::clone(&admin);
        async move { admin.start_audio().await }
    });
    assert!(wait_for(|| call.admin_media.user_prompts() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(admin_pc.offers().len(), 1, "no offer before the state settles");
    assert!(!task.is_finished());

    admin_pc.set_signaling_state(SignalingState::Stable);
    task.await.unwrap().unwrap();
    let offers = admin_pc.offers();
    assert_eq!(offers.len(), 2);
    assert_eq!(offers[1].sdp.matches("track:audio").count(), 2);
    assert!(admin.snapshot().audio_enabled);

    // the microphone got its own sender next to the live system audio
    assert_eq!(admin_pc.sender_tracks().len(), 3);
    let local = admin.snapshot().local_stream.unwrap();
    assert_eq!(local.tracks_of(MediaKind::Audio).count(), 2);
}

#[tokio::test]
async fn only_the_initiator_offers() {
    let call = call().await;
    let err = call.student.create_offer().await.unwrap_err();
    assert!(matches!(err, FixoError::Negotiation(_)));
    assert!(call.student_factory.last().unwrap().offers().is_empty());
}

#[tokio::test]
async fn initiator_ignores_competing_offers() {
    let call = call().await;
    let mut events = call.admin.events();

    call.harness
        .backend
        .send_signal(
            &TestHarness::student("stu-1"),
            NewSignal {
                session_id: call.session_id.clone(),
                signal_type: SignalType::Offer,
                signal_data: serde_json::json!({"type": "offer", "sdp": "v=0\n"}),
            },
        )
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        RtcEvent::SignalFailed {
            signal_type: SignalType::Offer,
            ..
        }
    ));
    let admin_pc = call.admin_factory.last().unwrap();
    assert!(admin_pc.remote_descriptions().is_empty());
    assert_eq!(admin_pc.signaling_state(), SignalingState::Stable);
}

#[tokio::test]
async fn ice_failure_triggers_a_restart_offer() {
    let call = call().await;
    call.admin.start_screen_share().await.unwrap();
    assert!(call.settled().await);
    let mut events = call.admin.events();

    let admin_pc = call.admin_factory.last().unwrap();
    admin_pc.emit(PeerEvent::IceConnectionState(IceConnectionState::Failed));

    let restarted = tokio::time::timeout(Duration::from_secs(2), async {
        while let Ok(event) = events.recv().await {
            if event == RtcEvent::IceRestart {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(restarted);
    assert!(wait_for(|| admin_pc.offers().len() == 2).await);
    assert!(admin_pc.offers()[1].sdp.contains("ice-restart"));
    assert!(call.settled().await);
}

#[tokio::test]
async fn answerer_does_not_restart_on_ice_failure() {
    let call = call().await;
    let student_pc = call.student_factory.last().unwrap();
    student_pc.emit(PeerEvent::IceConnectionState(IceConnectionState::Failed));
    assert!(
        wait_for(|| call.student.snapshot().ice_connection_state == IceConnectionState::Failed)
            .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(student_pc.offers().is_empty());
}

#[tokio::test]
async fn offers_give_up_if_signaling_never_settles() {
    let harness = TestHarness::builder()
        .with_config(|c| c.rtc.stable_timeout_secs = 1)
        .build()
        .await
        .unwrap();
    let call = call_with(harness).await;
    let admin_pc = call.admin_factory.last().unwrap();
    admin_pc.set_signaling_state(SignalingState::HaveRemoteOffer);

    let err = call.admin.create_offer().await.unwrap_err();
    assert!(matches!(err, FixoError::Timeout { .. }));
    assert!(admin_pc.offers().is_empty());
}

#[tokio::test]
async fn unanswered_capture_prompt_times_out() {
    let call = call().await;
    call.admin_media.set_mode(CaptureMode::Hang);
    let err = call.admin.start_screen_share().await.unwrap_err();
    assert!(matches!(err, FixoError::Timeout { .. }));
    assert!(!call.admin.snapshot().screen_sharing);
}

#[tokio::test]
async fn sharing_again_replaces_the_previous_capture() {
    let call = call().await;
    let admin_pc = call.admin_factory.last().unwrap();

    call.admin.start_screen_share().await.unwrap();
    assert!(call.settled().await);
    let first = call.admin_media.granted();

    call.admin.start_screen_share().await.unwrap();
    assert!(first.iter().all(|t| !t.is_live()));
    // idle senders were reused, so nothing new to negotiate
    assert_eq!(admin_pc.offers().len(), 1);
    assert_eq!(admin_pc.replaced().len(), 2);

    let stream = call.admin.snapshot().local_stream.unwrap();
    assert_eq!(stream.tracks_of(MediaKind::Video).count(), 1);

    // the first capture ending does not stop the second
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(call.admin.snapshot().screen_sharing);

    call.admin_media.end_capture();
    assert!(wait_for(|| !call.admin.snapshot().screen_sharing).await);
    call.admin.stop_screen_share().await;
}

#[tokio::test]
async fn remote_tracks_reach_the_answerer() {
    let call = call().await;
    call.admin.start_screen_share().await.unwrap();
    assert!(
        wait_for(|| call
            .student
            .snapshot()
            .remote_stream
            .is_some_and(|r| r.has_video() && r.has_audio()))
        .await
    );
}

#[tokio::test]
async fn cleanup_is_final_and_idempotent() {
    let call = call().await;
    call.admin.start_screen_share().await.unwrap();
    let granted = call.admin_media.granted();

    call.admin.cleanup().await;
    call.admin.cleanup().await;
    assert!(call.admin_factory.last().unwrap().is_closed());
    assert!(granted.iter().all(|t| !t.is_live()));

    let snapshot = call.admin.snapshot();
    assert!(snapshot.local_stream.is_none());
    assert!(!snapshot.screen_sharing);
    assert_eq!(snapshot.signaling_state, SignalingState::Closed);

    assert!(call.admin.initialize().await.is_err());
    assert!(call.admin.start_screen_share().await.is_err());
}

#[tokio::test]
async fn answerer_share_reaches_the_initiator() {
    let call = call().await;
    let admin_pc = call.admin_factory.last().unwrap();
    let student_pc = call.student_factory.last().unwrap();

    call.student.start_screen_share().await.unwrap();
    assert!(student_pc.offers().is_empty(), "the answering side never offers");

    assert!(wait_for(|| admin_pc.offers().len() == 1).await);
    assert!(call.settled().await);
    assert!(
        wait_for(|| call
            .admin
            .snapshot()
            .remote_stream
            .is_some_and(|r| r.has_video()))
        .await
    );
    assert!(student_pc.answers()[0].sdp.contains("track:video"));
}

#[tokio::test]
async fn answerer_microphone_triggers_one_offer() {
    let call = call().await;
    let admin_pc = call.admin_factory.last().unwrap();

    call.student.start_audio().await.unwrap();
    assert!(wait_for(|| admin_pc.offers().len() == 1).await);
    assert!(call.settled().await);
    assert!(
        wait_for(|| call
            .admin
            .snapshot()
            .remote_stream
            .is_some_and(|r| r.has_audio()))
        .await
    );

    // stopping and starting again reuses the sender
    call.student.stop_audio().await;
    call.student.start_audio().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(admin_pc.offers().len(), 1);
}

#[tokio::test]
async fn answerer_ignores_renegotiation_requests() {
    let call = call().await;
    let mut events = call.student.events();

    call.harness
        .backend
        .send_signal(
            &TestHarness::admin("adm-1"),
            NewSignal {
                session_id: call.session_id.clone(),
                signal_type: SignalType::Renegotiate,
                signal_data: serde_json::json!({}),
            },
        )
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        RtcEvent::SignalFailed {
            signal_type: SignalType::Renegotiate,
            ..
        }
    ));
    assert!(call.student_factory.last().unwrap().offers().is_empty());
}

#[tokio::test]
async fn own_envelopes_are_never_applied() {
    let call = call().await;
    let admin_id = TestHarness::admin("adm-1");
    let admin_pc = call.admin_factory.last().unwrap();
    let student_pc = call.student_factory.last().unwrap();

    let own = [
        (
            SignalType::Offer,
            serde_json::json!({"type": "offer", "sdp": "v=0\n"}),
        ),
        (
            SignalType::Answer,
            serde_json::json!({"type": "answer", "sdp": "v=0\n"}),
        ),
        (
            SignalType::IceCandidate,
            serde_json::json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"}),
        ),
        (SignalType::Renegotiate, serde_json::json!({})),
    ];
    for (signal_type, signal_data) in own {
        call.harness
            .backend
            .send_signal(
                &admin_id,
                NewSignal {
                    session_id: call.session_id.clone(),
                    signal_type,
                    signal_data,
                },
            )
            .await
            .unwrap();
    }

    // the peer did see them
    assert!(wait_for(|| !student_pc.remote_descriptions().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(admin_pc.remote_descriptions().is_empty());
    assert!(admin_pc.candidates().is_empty());
    assert!(admin_pc.offers().is_empty());
    assert_eq!(admin_pc.signaling_state(), SignalingState::Stable);
}
