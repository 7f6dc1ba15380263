//! Runtime invariant checks with a contract log
//!
//! Production code asserts its structural invariants through
//! [`assert_invariant!`]; every checked message is recorded in a thread-local
//! log so tests can prove the invariant was actually exercised, not merely
//! never violated.
//!
//! ```rust,ignore
//! use crabavatar::invariant_ppt::*;
//!
//! assert_invariant!(
//!     (0.0..=1.0).contains(&value),
//!     CHANNEL_IN_RANGE,
//!     "morph::set_channel"
//! );
//!
//! #[test]
//! fn contract_morph_driver() {
//!     // ... drive a MorphDriver ...
//!     contract_test("morph driver", &[CHANNEL_IN_RANGE]);
//! }
//! ```

use std::cell::RefCell;
use std::collections::HashSet;
use std::thread_local;

/// A morph channel value always lies in `[0, 1]` after a write.
pub const CHANNEL_IN_RANGE: &str = "Morph channel value must lie in [0, 1]";
/// At most one tween drives a channel.
pub const SINGLE_TWEEN_PER_CHANNEL: &str = "Exactly one live tween per channel";
/// Call-state changes follow the transition table.
pub const CALL_TRANSITION_ALLOWED: &str = "Call state transition must be in the table";
/// A pending offer is flushed at most once.
pub const OFFER_FLUSHED_ONCE: &str = "Pending offer is sent at most once";

thread_local! {
    static INVARIANT_LOG: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and log it for contract testing.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &str, context: Option<&str>) {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().insert(message.to_string());
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Whether `message` has been checked on this thread since the last clear.
pub fn invariant_checked(message: &str) -> bool {
    INVARIANT_LOG.with(|log| log.borrow().contains(message))
}

/// Check that specific invariants were verified during test execution.
///
/// # Panics
/// Panics if any required invariant was not checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| !invariant_checked(invariant))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Clear the invariant log (call between test runs if needed)
pub fn clear_invariant_log() {
    INVARIANT_LOG.with(|log| {
        log.borrow_mut().clear();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_invariant_is_logged() {
        clear_invariant_log();
        assert!(!invariant_checked(CHANNEL_IN_RANGE));
        assert_invariant!(true, CHANNEL_IN_RANGE, "test");
        assert!(invariant_checked(CHANNEL_IN_RANGE));
        contract_test("logged", &[CHANNEL_IN_RANGE]);
    }

    #[test]
    #[should_panic(expected = "INVARIANT VIOLATION")]
    fn test_violation_panics() {
        assert_invariant!(false, SINGLE_TWEEN_PER_CHANNEL);
    }

    #[test]
    #[should_panic(expected = "CONTRACT FAILURE")]
    fn test_missing_contract_panics() {
        clear_invariant_log();
        contract_test("missing", &[OFFER_FLUSHED_ONCE]);
    }
}
