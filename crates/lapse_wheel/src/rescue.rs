// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
};

/// Runs `f`, logging and swallowing a panic instead of unwinding into the caller.
///
/// Returns `true` if `f` completed normally.
pub(crate) fn rescue(f: impl FnOnce()) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!(panic = panic_message(payload.as_ref()), "timer callback panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn completed_call_is_reported() {
        let mut ran = false;
        assert!(rescue(|| ran = true));
        assert!(ran);
    }

    #[test]
    #[traced_test]
    fn panic_is_contained_and_logged() {
        assert!(!rescue(|| panic!("boom {}", 42)));
        assert!(logs_contain("timer callback panicked"));
        assert!(logs_contain("boom 42"));
    }

    #[test]
    fn panic_message_handles_payload_kinds() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&7_u32), "<non-string panic payload>");
    }
}
