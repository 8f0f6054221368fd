// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use fixo_core::{FixoError, NewMessage};
use proptest::prelude::*;

proptest! {
    #[test]
    fn whitespace_only_text_is_always_rejected(text in "[ \t\r\n]{0,32}") {
        let result = NewMessage::text("s1", text).validate();
        prop_assert!(matches!(result, Err(FixoError::Validation(_))));
    }

    #[test]
    fn accepted_text_is_trimmed_and_non_empty(
        pad_left in "[ \t\n]{0,4}",
        body in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,20}[a-zA-Z0-9]",
        pad_right in "[ \t\n]{0,4}",
    ) {
        let msg = NewMessage::text("s1", format!("{pad_left}{body}{pad_right}"))
            .validate()
            .unwrap();
        prop_assert_eq!(msg.message, body);
    }
}
