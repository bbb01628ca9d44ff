//! Assertion helpers for test bodies
//!
//! Every helper returns `Err(HarnessError::AssertionFailed)` instead of
//! panicking, so a failed check ends only its own test and the harness still
//! runs teardown. Messages carry the caller's source location.
//!
//! # API
//!
//! ## Basic
//! - `ensure(condition, message)`
//! - `ensure_false(condition, message)`
//!
//! ## Equality
//! - `ensure_eq(actual, expected)`
//! - `ensure_ne(actual, unexpected)`
//!
//! ## Option / Result
//! - `ensure_some(option, what)`: returns the inner value
//! - `ensure_none(option, what)`
//! - `ensure_ok(result)`: returns the inner value
//! - `ensure_err(result)`: returns the error
//!
//! ## Collections
//! - `ensure_contains(items, needle)`
//! - `ensure_len(items, expected)`
//!
//! The `check!` and `check_eq!` macros wrap these with an implicit `?`.

use crate::error::{HarnessError, HarnessResult};
use std::fmt::{Debug, Display};
use std::panic::Location;

#[track_caller]
fn failure(message: impl Into<String>) -> HarnessError {
    let location = Location::caller();
    HarnessError::AssertionFailed(format!(
        "{} (at {}:{})",
        message.into(),
        location.file(),
        location.line()
    ))
}

// ============================================================================
// Basic
// ============================================================================

#[track_caller]
pub fn ensure(condition: bool, message: impl Into<String>) -> HarnessResult<()> {
    if condition {
        Ok(())
    } else {
        Err(failure(message))
    }
}

#[track_caller]
pub fn ensure_false(condition: bool, message: impl Into<String>) -> HarnessResult<()> {
    if condition {
        Err(failure(message))
    } else {
        Ok(())
    }
}

// ============================================================================
// Equality
// ============================================================================

#[track_caller]
pub fn ensure_eq<T: PartialEq + Debug>(actual: T, expected: T) -> HarnessResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(failure(format!(
            "expected {:?}, got {:?}",
            expected, actual
        )))
    }
}

#[track_caller]
pub fn ensure_ne<T: PartialEq + Debug>(actual: T, unexpected: T) -> HarnessResult<()> {
    if actual != unexpected {
        Ok(())
    } else {
        Err(failure(format!("expected anything but {:?}", unexpected)))
    }
}

// ============================================================================
// Option / Result
// ============================================================================

/// Unwrap `option`, failing with `what` if it is `None`
#[track_caller]
pub fn ensure_some<T>(option: Option<T>, what: &str) -> HarnessResult<T> {
    match option {
        Some(value) => Ok(value),
        None => Err(failure(format!("expected {} to be present", what))),
    }
}

#[track_caller]
pub fn ensure_none<T: Debug>(option: Option<T>, what: &str) -> HarnessResult<()> {
    match option {
        None => Ok(()),
        Some(value) => Err(failure(format!(
            "expected {} to be absent, got {:?}",
            what, value
        ))),
    }
}

/// Unwrap an `Ok`, rendering the error otherwise
#[track_caller]
pub fn ensure_ok<T, E: Display>(result: Result<T, E>) -> HarnessResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => Err(failure(format!("expected Ok, got Err({})", err))),
    }
}

/// Unwrap an `Err`
#[track_caller]
pub fn ensure_err<T: Debug, E>(result: Result<T, E>) -> HarnessResult<E> {
    match result {
        Ok(value) => Err(failure(format!("expected Err, got Ok({:?})", value))),
        Err(err) => Ok(err),
    }
}

// ============================================================================
// Collections
// ============================================================================

#[track_caller]
pub fn ensure_contains<T: PartialEq + Debug>(items: &[T], needle: &T) -> HarnessResult<()> {
    if items.contains(needle) {
        Ok(())
    } else {
        Err(failure(format!("expected {:?} to contain {:?}", items, needle)))
    }
}

#[track_caller]
pub fn ensure_len<T>(items: &[T], expected: usize) -> HarnessResult<()> {
    if items.len() == expected {
        Ok(())
    } else {
        Err(failure(format!(
            "expected length {}, got {}",
            expected,
            items.len()
        )))
    }
}

/// Return early from a test body when a condition does not hold
///
/// ```
/// # fn body() -> vigil_runtime::HarnessResult<()> {
/// let ready = true;
/// vigil_runtime::check!(ready);
/// vigil_runtime::check!(1 + 1 == 2, "arithmetic still works");
/// # Ok(())
/// # }
/// # body().unwrap();
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        $crate::assert::ensure($cond, concat!("check failed: ", stringify!($cond)))?
    };
    ($cond:expr, $($arg:tt)+) => {
        $crate::assert::ensure($cond, format!($($arg)+))?
    };
}

/// Return early from a test body when two values differ
#[macro_export]
macro_rules! check_eq {
    ($actual:expr, $expected:expr $(,)?) => {
        $crate::assert::ensure_eq(&$actual, &$expected)?
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn message(err: HarnessError) -> String {
        match err {
            HarnessError::AssertionFailed(msg) => msg,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ensure_records_location() {
        let msg = message(ensure(false, "engine initialized").unwrap_err());
        assert!(msg.starts_with("engine initialized (at "));
        assert!(msg.contains("assert.rs"));
        assert!(ensure(true, "fine").is_ok());
        assert!(ensure_false(false, "fine").is_ok());
    }

    #[rstest]
    #[case(1, 1, true)]
    #[case(1, 2, false)]
    #[case(-4, -4, true)]
    fn test_ensure_eq(#[case] actual: i64, #[case] expected: i64, #[case] ok: bool) {
        assert_eq!(ensure_eq(actual, expected).is_ok(), ok);
        assert_eq!(ensure_ne(actual, expected).is_ok(), !ok);
    }

    #[test]
    fn test_ensure_eq_message() {
        let msg = message(ensure_eq("got", "want").unwrap_err());
        assert!(msg.starts_with("expected \"want\", got \"got\""));
    }

    #[test]
    fn test_option_and_result_helpers() {
        assert_eq!(ensure_some(Some(3), "value"), Ok(3));
        assert!(message(ensure_some::<u8>(None, "dump id").unwrap_err())
            .contains("expected dump id to be present"));
        assert!(ensure_none::<u8>(None, "x").is_ok());
        assert!(ensure_none(Some(1), "x").is_err());

        assert_eq!(ensure_ok::<_, String>(Ok(5)), Ok(5));
        assert!(message(ensure_ok::<u8, _>(Err("broken")).unwrap_err())
            .contains("expected Ok, got Err(broken)"));
        assert_eq!(ensure_err::<u8, _>(Err("e")), Ok("e"));
        assert!(ensure_err::<_, String>(Ok(1)).is_err());
    }

    #[test]
    fn test_collection_helpers() {
        let items = vec!["a", "b"];
        assert!(ensure_contains(&items, &"b").is_ok());
        assert!(ensure_contains(&items, &"z").is_err());
        assert!(ensure_len(&items, 2).is_ok());
        assert!(message(ensure_len(&items, 3).unwrap_err()).contains("expected length 3, got 2"));
    }

    #[test]
    fn test_macros_return_early() {
        fn body(value: u32) -> HarnessResult<&'static str> {
            crate::check!(value > 1);
            crate::check_eq!(value, 5);
            Ok("reached")
        }
        assert_eq!(body(5), Ok("reached"));
        assert!(message(body(0).unwrap_err()).contains("check failed: value > 1"));
        assert!(message(body(3).unwrap_err()).contains("expected 5, got 3"));
    }
}
