//! Per-test state: status, cleanups, owned waits and holds

use crate::error::HarnessError;
use crate::event_loop::TimerId;
use crate::observer::SubscriptionId;
use crate::operation::PendingOperation;
use crate::report::TestReport;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// A fallible cleanup action; `Err` carries the failure message
pub type Cleanup = Box<dyn FnOnce() -> Result<(), String>>;

/// Lifecycle status of a test
///
/// `NotStarted -> Pending -> {Passed, Failed, TimedOut}`; there is no
/// transition out of a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    NotStarted,
    Pending,
    Passed,
    Failed,
    TimedOut,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Passed | Status::Failed | Status::TimedOut)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::NotStarted => "not started",
            Status::Pending => "pending",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Outcome handed to `finish`
///
/// A failure carrying [`HarnessError::TimedOut`] finishes the test as
/// [`Status::TimedOut`] rather than [`Status::Failed`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Passed,
    Failed(HarnessError),
}

impl Outcome {
    pub(crate) fn into_status(self) -> (Status, Option<HarnessError>) {
        match self {
            Outcome::Passed => (Status::Passed, None),
            Outcome::Failed(err) if err.is_timeout() => (Status::TimedOut, Some(err)),
            Outcome::Failed(err) => (Status::Failed, Some(err)),
        }
    }
}

impl From<Result<(), HarnessError>> for Outcome {
    fn from(result: Result<(), HarnessError>) -> Self {
        match result {
            Ok(()) => Outcome::Passed,
            Err(err) => Outcome::Failed(err),
        }
    }
}

pub(crate) struct TestState {
    pub(crate) name: String,
    pub(crate) status: Cell<Status>,
    pub(crate) started_at: Cell<Duration>,
    pub(crate) deadline: Cell<Option<Duration>>,
    pub(crate) deadline_timer: Cell<Option<TimerId>>,
    pub(crate) cleanups: RefCell<Vec<Cleanup>>,
    pub(crate) subscriptions: RefCell<Vec<SubscriptionId>>,
    pub(crate) operations: RefCell<Vec<Rc<PendingOperation>>>,
    pub(crate) holds: Cell<usize>,
    pub(crate) error: RefCell<Option<HarnessError>>,
    pub(crate) warnings: RefCell<Vec<HarnessError>>,
    pub(crate) report: RefCell<Option<TestReport>>,
}

/// Handle to one test owned by a harness
///
/// Cloning shares the same test.
#[derive(Clone)]
pub struct TestCase {
    pub(crate) state: Rc<TestState>,
}

impl TestCase {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            state: Rc::new(TestState {
                name: name.to_string(),
                status: Cell::new(Status::NotStarted),
                started_at: Cell::new(Duration::ZERO),
                deadline: Cell::new(None),
                deadline_timer: Cell::new(None),
                cleanups: RefCell::new(Vec::new()),
                subscriptions: RefCell::new(Vec::new()),
                operations: RefCell::new(Vec::new()),
                holds: Cell::new(0),
                error: RefCell::new(None),
                warnings: RefCell::new(Vec::new()),
                report: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn start(&self, now: Duration, deadline: Option<Duration>) {
        self.state.started_at.set(now);
        self.state.deadline.set(deadline);
        self.state.status.set(Status::Pending);
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn status(&self) -> Status {
        self.state.status.get()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Loop time at which the test began
    pub fn started_at(&self) -> Duration {
        self.state.started_at.get()
    }

    /// Loop time by which the test must settle, if one was set
    pub fn deadline(&self) -> Option<Duration> {
        self.state.deadline.get()
    }

    /// Error attached to a failed or timed-out test
    pub fn error(&self) -> Option<HarnessError> {
        self.state.error.borrow().clone()
    }

    /// Harness-internal warnings recorded for this test
    pub fn warnings(&self) -> Vec<HarnessError> {
        self.state.warnings.borrow().clone()
    }

    /// The report emitted at teardown
    pub fn report(&self) -> Option<TestReport> {
        self.state.report.borrow().clone()
    }

    /// Number of unreleased holds
    pub fn holds(&self) -> usize {
        self.state.holds.get()
    }

    /// Number of registered cleanups that have not run
    pub fn pending_cleanups(&self) -> usize {
        self.state.cleanups.borrow().len()
    }

    /// Number of waits still outstanding
    pub fn pending_operations(&self) -> usize {
        self.state
            .operations
            .borrow()
            .iter()
            .filter(|op| op.is_pending())
            .count()
    }

    pub(crate) fn warn(&self, warning: HarnessError) {
        tracing::warn!(test = %self.state.name, warning = %warning, "harness warning");
        self.state.warnings.borrow_mut().push(warning);
    }

    pub(crate) fn forget_operation(&self, op: &Rc<PendingOperation>) {
        self.state
            .operations
            .borrow_mut()
            .retain(|held| !Rc::ptr_eq(held, op));
    }

    pub(crate) fn take_hold(&self) -> HoldGuard {
        self.state.holds.set(self.state.holds.get() + 1);
        HoldGuard {
            state: Rc::clone(&self.state),
            released: false,
        }
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.state.name)
            .field("status", &self.status())
            .field("holds", &self.holds())
            .field("cleanups", &self.pending_cleanups())
            .finish()
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.state.name, self.status())
    }
}

/// Keeps a test pending after its body has returned
///
/// Released on drop.
pub struct HoldGuard {
    state: Rc<TestState>,
    released: bool,
}

impl HoldGuard {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.state.holds.set(self.state.holds.get().saturating_sub(1));
        }
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for HoldGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HoldGuard")
            .field("test", &self.state.name)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!Status::NotStarted.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(Status::Passed.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::TimedOut.is_terminal());
    }

    #[test]
    fn test_timeout_outcome_maps_to_timed_out() {
        let err = HarnessError::TimedOut {
            what: "topic 'x'".to_string(),
            after: Duration::from_millis(5),
        };
        let (status, error) = Outcome::Failed(err.clone()).into_status();
        assert_eq!(status, Status::TimedOut);
        assert_eq!(error, Some(err));

        let (status, _) = Outcome::from(Err(HarnessError::AssertionFailed("x".into()))).into_status();
        assert_eq!(status, Status::Failed);
        assert_eq!(Outcome::from(Ok(())), Outcome::Passed);
    }

    #[test]
    fn test_hold_guard_counts() {
        let test = TestCase::new("holds");
        let a = test.take_hold();
        let b = test.take_hold();
        assert_eq!(test.holds(), 2);

        a.release();
        assert_eq!(test.holds(), 1);
        drop(b);
        assert_eq!(test.holds(), 0);
    }

    #[test]
    fn test_new_case_is_not_started() {
        let test = TestCase::new("fresh");
        assert_eq!(test.status(), Status::NotStarted);
        test.start(Duration::from_millis(3), Some(Duration::from_millis(10)));
        assert_eq!(test.status(), Status::Pending);
        assert_eq!(test.started_at(), Duration::from_millis(3));
        assert_eq!(test.deadline(), Some(Duration::from_millis(10)));
        assert_eq!(test.to_string(), "fresh (pending)");
    }
}
