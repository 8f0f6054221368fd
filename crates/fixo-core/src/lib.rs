// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Fixo live support engine.
//!
//! This crate provides the error type, domain types and the trait seams
//! between the session orchestrator and its collaborators (session store,
//! message channel, signaling relay, blob store).

pub mod error;
pub mod protocol;
pub mod subscription;
pub mod traits;
pub mod types;

pub use error::{FixoError, MediaErrorKind};
pub use subscription::Subscription;
pub use types::{
    AdapterType, Attachment, AttachmentKind, ChangeKind, ConversationSummary, HealthStatus,
    Identity, Message, MessageType, NewMessage, NewSession, NewSignal, Role, Session,
    SessionChange, SessionStatus, SignalEnvelope, SignalType,
};

pub use traits::{
    BlobStore, MessageChannel, PluginAdapter, SessionStore, SignalRelay, StorageAdapter,
    SupportBackend,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn session(status: SessionStatus, admin: Option<&str>) -> Session {
        Session {
            id: "s1".into(),
            student_id: "stu".into(),
            admin_id: admin.map(String::from),
            status,
            complaint_id: None,
            initiator: Role::Student,
            created_at: types::now_iso(),
            started_at: None,
            ended_at: (status == SessionStatus::Ended).then(types::now_iso),
            updated_at: types::now_iso(),
        }
    }

    #[test]
    fn error_codes_are_distinct_for_media_causes() {
        let denied = FixoError::media(MediaErrorKind::PermissionDenied, "no");
        let unsupported = FixoError::media(MediaErrorKind::Unsupported, "no api");
        assert_eq!(denied.code(), "media");
        assert!(denied.to_string().contains("permission_denied"));
        assert!(unsupported.to_string().contains("unsupported"));
    }

    #[test]
    fn invalid_transition_message_names_state() {
        let err = FixoError::InvalidTransition {
            session_id: "abc".into(),
            from: SessionStatus::Active,
            action: "join".into(),
        };
        assert_eq!(err.to_string(), "cannot join session abc while it is active");
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn status_strings_match_storage_format() {
        for status in [
            SessionStatus::Waiting,
            SessionStatus::Active,
            SessionStatus::Ended,
        ] {
            let s = status.to_string();
            assert_eq!(SessionStatus::from_str(&s).unwrap(), status);
            assert_eq!(serde_json::to_string(&status).unwrap(), format!("\"{s}\""));
        }
        assert!(SessionStatus::Waiting.rank() < SessionStatus::Active.rank());
        assert!(SessionStatus::Active.rank() < SessionStatus::Ended.rank());
    }

    #[test]
    fn signal_type_uses_dashed_wire_name() {
        assert_eq!(SignalType::IceCandidate.to_string(), "ice-candidate");
        assert_eq!(
            serde_json::to_string(&SignalType::IceCandidate).unwrap(),
            "\"ice-candidate\""
        );
        assert_eq!(
            SignalType::from_str("offer").unwrap(),
            SignalType::Offer
        );
        assert_eq!(
            SignalType::from_str("renegotiate").unwrap(),
            SignalType::Renegotiate
        );
    }

    #[test]
    fn session_invariants() {
        assert!(session(SessionStatus::Waiting, None).check_invariants().is_ok());
        assert!(session(SessionStatus::Waiting, Some("adm")).check_invariants().is_err());
        assert!(session(SessionStatus::Active, None).check_invariants().is_err());
        assert!(session(SessionStatus::Active, Some("adm")).check_invariants().is_ok());
        assert!(session(SessionStatus::Ended, None).check_invariants().is_ok());
    }

    #[test]
    fn participant_lookup() {
        let s = session(SessionStatus::Active, Some("adm"));
        assert_eq!(s.role_of("stu"), Some(Role::Student));
        assert_eq!(s.role_of("adm"), Some(Role::Admin));
        assert_eq!(s.role_of("other"), None);
        assert_eq!(s.peer_of("stu"), Some("adm"));
        assert_eq!(s.peer_of("adm"), Some("stu"));
        assert!(!s.is_participant("other"));
    }

    #[test]
    fn initiator_follows_creation_mode() {
        assert_eq!(NewSession::queued("stu").initiator(), Role::Student);
        assert_eq!(NewSession::direct("stu", "adm").initiator(), Role::Admin);
    }

    #[test]
    fn message_validation_trims_and_rejects_blank() {
        let msg = NewMessage::text("s1", "  Wifi not working \n").validate().unwrap();
        assert_eq!(msg.message, "Wifi not working");

        let err = NewMessage::text("s1", " \t\n ").validate().unwrap_err();
        assert!(matches!(err, FixoError::Validation(_)));
    }

    #[test]
    fn message_validation_enforces_file_url_pairing() {
        let mut text = NewMessage::text("s1", "hi");
        text.file_url = Some("s1/1.png".into());
        assert!(text.validate().is_err());

        let mut file = NewMessage::file("s1", "shot.png", "s1/1.png");
        assert_eq!(file.message, "Shared file: shot.png");
        assert!(file.clone().validate().is_ok());
        file.file_url = None;
        assert!(file.validate().is_err());
    }

    #[test]
    fn attachment_kind_sniffs_extension() {
        assert_eq!(AttachmentKind::from_path("s/1.PNG"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_path("s/1.webm"), AttachmentKind::Video);
        assert_eq!(AttachmentKind::from_path("s/1.pdf"), AttachmentKind::File);
        assert_eq!(AttachmentKind::from_path("s/noext"), AttachmentKind::File);
    }

    #[test]
    fn now_iso_sorts_lexically() {
        let a = types::now_iso();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = types::now_iso();
        assert!(a < b);
        assert!(a.ends_with('Z'));
        assert_eq!(a.len(), "2026-01-01T00:00:00.000Z".len());
    }

    #[test]
    fn all_traits_are_exported() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_storage_adapter<T: StorageAdapter>() {}
        fn _assert_blob_store<T: BlobStore>() {}
        fn _assert_backend<T: SupportBackend>() {}
    }
}
