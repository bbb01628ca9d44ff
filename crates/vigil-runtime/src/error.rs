//! Harness error taxonomy
//!
//! One enum covers both the errors a test body can raise and the
//! harness-internal inconsistencies that are downgraded to warnings once a
//! test has reached its terminal status.

use crate::observer::SubscriptionId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the harness and by test bodies running under it
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HarnessError {
    /// A test with this name is already active (or already reported) in this harness
    #[error("Duplicate test: '{name}' is already registered")]
    DuplicateTest { name: String },

    /// An awaited condition never fired within its budget
    #[error("Timed out after {after:?} waiting for {what}")]
    TimedOut { what: String, after: Duration },

    /// A check inside the test body did not hold
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// An observer handle was released twice
    #[error("Observer {0} was already unsubscribed")]
    ObserverAlreadyUnsubscribed(SubscriptionId),

    /// A registered cleanup action failed
    #[error("Cleanup #{index} failed: {message}")]
    CleanupError { index: usize, message: String },

    /// `finish` was called on a test that already has a terminal status
    #[error("Test '{name}' was already finished")]
    AlreadyFinished { name: String },

    /// The test body panicked
    #[error("Test body panicked: {0}")]
    BodyPanicked(String),

    /// The test body returned an error of its own
    #[error("Test body failed: {0}")]
    Body(String),

    /// The wait was abandoned because its test was torn down
    #[error("Operation cancelled by test teardown")]
    Cancelled,

    /// A crash artifact could not be decoded
    #[error("Invalid crash artifact: {0}")]
    InvalidArtifact(String),
}

impl HarnessError {
    /// Wrap any displayable error raised by a test body
    pub fn body(error: impl fmt::Display) -> Self {
        HarnessError::Body(error.to_string())
    }

    /// Whether this error represents "never happened" rather than "happened and was wrong"
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::TimedOut { .. })
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Render a caught panic payload as a message
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_failure() {
        let timeout = HarnessError::TimedOut {
            what: "topic 'ready'".to_string(),
            after: Duration::from_millis(50),
        };
        assert!(timeout.is_timeout());
        assert!(!HarnessError::AssertionFailed("nope".to_string()).is_timeout());
    }

    #[test]
    fn test_body_error_display() {
        let err = HarnessError::body("disk full");
        assert_eq!(err.to_string(), "Test body failed: disk full");
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");

        let boxed: Box<dyn std::any::Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
