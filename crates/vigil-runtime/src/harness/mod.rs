//! Async test harness
//!
//! The harness owns the lifecycle of named tests running on one
//! [`Environment`]: registration of pending waits, cooperative suspension
//! until an external event fires, timeouts, and one terminal report per test
//! followed by teardown.
//!
//! Teardown is identical for every terminal status:
//! 1. outstanding waits are cancelled (their late completions are discarded)
//! 2. test-scoped subscriptions are released
//! 3. cleanups run in reverse registration order, exactly once
//! 4. the report is emitted
//!
//! Failures inside teardown never replace the first terminal outcome; they
//! are recorded as warnings on the test.

mod test_case;

pub use test_case::{Cleanup, HoldGuard, Outcome, Status, TestCase};

use crate::clock::{Clock, ClockKind};
use crate::error::{panic_message, HarnessError, HarnessResult};
use crate::event_loop::{EventLoop, TimerId};
use crate::observer::{ObserverRegistry, Payload, SubscriptionId};
use crate::operation::{Expectation, PendingOperation};
use crate::report::{ReportSink, TestReport, TracingSink};
use chrono::Utc;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

/// Budget for a test run when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Process-wide state a harness runs against: one loop and its registry
///
/// Created explicitly and injected, so several isolated environments can
/// coexist (one per thread, or one per test of the harness itself).
#[derive(Clone)]
pub struct Environment {
    event_loop: EventLoop,
    registry: ObserverRegistry,
}

impl Environment {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        let event_loop = EventLoop::new(clock);
        let registry = ObserverRegistry::new(&event_loop);
        Self {
            event_loop,
            registry,
        }
    }

    /// Environment driven by a freshly built clock of `kind`
    pub fn with_clock(kind: ClockKind) -> Self {
        Self::new(kind.build())
    }

    /// Environment on simulated time
    pub fn virtual_time() -> Self {
        Self::with_clock(ClockKind::Virtual)
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn registry(&self) -> &ObserverRegistry {
        &self.registry
    }

    pub fn now(&self) -> Duration {
        self.event_loop.now()
    }

    /// Release every subscription and stop the loop
    pub fn shutdown(&self) {
        self.registry.close();
        self.event_loop.shutdown();
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("event_loop", &self.event_loop)
            .field("registry", &self.registry)
            .finish()
    }
}

struct HarnessInner {
    env: Environment,
    sink: Rc<dyn ReportSink>,
    default_timeout: Duration,
    active: RefCell<BTreeMap<String, TestCase>>,
    seen: RefCell<HashSet<String>>,
}

/// Runs named tests on an [`Environment`]
///
/// Cloning the handle shares the same harness; test bodies capture a clone.
#[derive(Clone)]
pub struct Harness {
    inner: Rc<HarnessInner>,
}

impl Harness {
    /// Harness reporting through `tracing` with [`DEFAULT_TIMEOUT`]
    pub fn new(env: &Environment) -> Self {
        Self::with_options(env, Rc::new(TracingSink), DEFAULT_TIMEOUT)
    }

    pub fn with_options(
        env: &Environment,
        sink: Rc<dyn ReportSink>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            inner: Rc::new(HarnessInner {
                env: env.clone(),
                sink,
                default_timeout,
                active: RefCell::new(BTreeMap::new()),
                seen: RefCell::new(HashSet::new()),
            }),
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    pub fn event_loop(&self) -> &EventLoop {
        self.inner.env.event_loop()
    }

    pub fn registry(&self) -> &ObserverRegistry {
        self.inner.env.registry()
    }

    pub fn now(&self) -> Duration {
        self.inner.env.now()
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Names of tests that have begun but not finished
    pub fn active_tests(&self) -> Vec<String> {
        self.inner.active.borrow().keys().cloned().collect()
    }

    /// Start a test with no deadline of its own
    ///
    /// A name is rejected as a duplicate while its test is active and also
    /// after it has been reported, so no name is ever reported twice.
    pub fn begin(&self, name: &str) -> HarnessResult<TestCase> {
        self.begin_inner(name, None)
    }

    /// Start a test that must settle within `budget`
    pub fn begin_with_deadline(&self, name: &str, budget: Duration) -> HarnessResult<TestCase> {
        self.begin_inner(name, Some(budget))
    }

    fn begin_inner(&self, name: &str, budget: Option<Duration>) -> HarnessResult<TestCase> {
        if !self.inner.seen.borrow_mut().insert(name.to_string()) {
            return Err(HarnessError::DuplicateTest {
                name: name.to_string(),
            });
        }
        let test = TestCase::new(name);
        let now = self.now();
        test.start(now, budget.map(|b| now + b));
        if let Some(budget) = budget {
            self.arm_deadline(&test, budget);
        }
        self.inner
            .active
            .borrow_mut()
            .insert(name.to_string(), test.clone());
        tracing::debug!(test = name, "test started");
        Ok(test)
    }

    /// Time the test out if it is still pending once `budget` has elapsed
    fn arm_deadline(&self, test: &TestCase, budget: Duration) {
        let harness = Rc::downgrade(&self.inner);
        let target = test.clone();
        let timer = self.event_loop().set_timeout(budget, move || {
            let Some(inner) = harness.upgrade() else {
                return;
            };
            if target.is_terminal() {
                return;
            }
            tracing::debug!(test = target.name(), "test deadline reached");
            Harness { inner }.finish(&target, Outcome::Failed(deadline_error(&target, budget)));
        });
        test.state.deadline_timer.set(Some(timer));
    }

    /// Wait for `expectation` on behalf of `test`
    ///
    /// The wait is registered before this returns, so events published after
    /// the call are seen even if the future is first polled later. Resolves to
    /// the event payload, `TimedOut` once `timeout` elapses, or `Cancelled`
    /// if the test is torn down first (or already was). A wait never outlives
    /// the test's own deadline.
    pub fn await_operation(
        &self,
        test: &TestCase,
        expectation: Expectation,
        timeout: Duration,
    ) -> impl Future<Output = HarnessResult<Payload>> + 'static {
        let timeout = match test.deadline() {
            Some(deadline) => timeout.min(deadline.saturating_sub(self.now())),
            None => timeout,
        };
        let armed = if test.is_terminal() {
            None
        } else {
            let (op, rx) = PendingOperation::arm(self.registry(), expectation, timeout);
            if op.is_pending() {
                test.state.operations.borrow_mut().push(Rc::clone(&op));
            }
            Some((op, rx))
        };
        let test = test.clone();
        async move {
            let (op, rx) = armed.ok_or(HarnessError::Cancelled)?;
            let result = rx.await.unwrap_or(Err(HarnessError::Cancelled));
            test.forget_operation(&op);
            result
        }
    }

    /// Wait for the next notification on `topic`
    pub fn await_topic(
        &self,
        test: &TestCase,
        topic: &str,
        timeout: Duration,
    ) -> impl Future<Output = HarnessResult<Payload>> + 'static {
        self.await_operation(test, Expectation::topic(topic), timeout)
    }

    /// Queue a cleanup to run at teardown
    ///
    /// Registered after teardown, the action runs immediately.
    pub fn register_cleanup(
        &self,
        test: &TestCase,
        action: impl FnOnce() -> Result<(), String> + 'static,
    ) {
        if test.is_terminal() {
            tracing::debug!(test = test.name(), "cleanup registered after teardown; running now");
            let index = test.state.cleanups.borrow().len();
            run_cleanup(test, index, Box::new(action));
            return;
        }
        test.state.cleanups.borrow_mut().push(Box::new(action));
    }

    /// Subscribe on behalf of `test`; released at its teardown
    pub fn subscribe(
        &self,
        test: &TestCase,
        topic: &str,
        callback: impl Fn(&str, &Payload) + 'static,
    ) -> HarnessResult<SubscriptionId> {
        if test.is_terminal() {
            return Err(HarnessError::AlreadyFinished {
                name: test.name().to_string(),
            });
        }
        let id = self.registry().subscribe(topic, callback);
        test.state.subscriptions.borrow_mut().push(id);
        Ok(id)
    }

    /// Keep `test` pending until the returned guard is released
    pub fn hold(&self, test: &TestCase) -> HoldGuard {
        test.take_hold()
    }

    /// Publish a notification through the environment's registry
    pub fn publish(&self, topic: &str, payload: Payload) {
        self.registry().publish(topic, payload);
    }

    /// Publish a notification once `delay` has elapsed
    pub fn publish_after(&self, delay: Duration, topic: &str, payload: Payload) -> TimerId {
        self.registry().publish_after(delay, topic, payload)
    }

    /// Drive the loop until `predicate` holds or `timeout` elapses
    pub fn pump_until(&self, predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        self.event_loop().pump_until(predicate, timeout)
    }

    /// Record the terminal outcome of `test` and tear it down
    ///
    /// Finishing a test that is already terminal changes nothing and records
    /// an `AlreadyFinished` warning.
    pub fn finish(&self, test: &TestCase, outcome: Outcome) {
        if test.is_terminal() {
            test.warn(HarnessError::AlreadyFinished {
                name: test.name().to_string(),
            });
            return;
        }

        let (status, error) = outcome.into_status();
        test.state.status.set(status);
        *test.state.error.borrow_mut() = error;

        if let Some(timer) = test.state.deadline_timer.take() {
            self.event_loop().clear_timeout(timer);
        }

        let operations = std::mem::take(&mut *test.state.operations.borrow_mut());
        for op in operations {
            op.cancel();
        }

        let subscriptions = std::mem::take(&mut *test.state.subscriptions.borrow_mut());
        for id in subscriptions {
            if let Err(err) = self.registry().unsubscribe(id) {
                test.warn(err);
            }
        }

        let cleanups = std::mem::take(&mut *test.state.cleanups.borrow_mut());
        for (index, cleanup) in cleanups.into_iter().enumerate().rev() {
            run_cleanup(test, index, cleanup);
        }

        let report = self.build_report(test);
        self.inner.active.borrow_mut().remove(test.name());
        *test.state.report.borrow_mut() = Some(report.clone());
        self.inner.sink.report_result(&report);
    }

    fn build_report(&self, test: &TestCase) -> TestReport {
        TestReport {
            name: test.name().to_string(),
            status: test.status(),
            message: test.error().map(|err| err.to_string()),
            duration: self.now().saturating_sub(test.started_at()),
            warnings: test.warnings().iter().map(|w| w.to_string()).collect(),
            finished_at: Utc::now(),
        }
    }

    /// Run `body` as test `name` with the default budget
    pub fn run<F, Fut>(&self, name: &str, body: F) -> HarnessResult<TestReport>
    where
        F: FnOnce(Harness, TestCase) -> Fut,
        Fut: Future<Output = HarnessResult<()>> + 'static,
    {
        self.run_with_timeout(name, self.default_timeout(), body)
    }

    /// Run `body` as test `name`, pumping the loop until it settles
    ///
    /// The body runs as a task on the loop. The test passes once the body
    /// returns `Ok` and every hold is released; a body error or panic fails
    /// it; reaching `budget` first times it out. Teardown always runs.
    pub fn run_with_timeout<F, Fut>(
        &self,
        name: &str,
        budget: Duration,
        body: F,
    ) -> HarnessResult<TestReport>
    where
        F: FnOnce(Harness, TestCase) -> Fut,
        Fut: Future<Output = HarnessResult<()>> + 'static,
    {
        let test = self.begin_with_deadline(name, budget)?;
        let slot: Rc<RefCell<Option<HarnessResult<()>>>> = Rc::new(RefCell::new(None));

        let future = match catch_unwind(AssertUnwindSafe(|| body(self.clone(), test.clone()))) {
            Ok(future) => future,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.finish(&test, Outcome::Failed(HarnessError::BodyPanicked(message)));
                return Ok(test.report().unwrap_or_else(|| self.build_report(&test)));
            }
        };
        let body_slot = Rc::clone(&slot);
        let task = self.event_loop().spawn_local(Some(name.to_string()), async move {
            let result = future.await;
            *body_slot.borrow_mut() = Some(result);
        });

        let settled = {
            let test = test.clone();
            let slot = Rc::clone(&slot);
            let task = task.clone();
            self.pump_until(
                move || {
                    test.is_terminal()
                        || task.is_failed()
                        || match &*slot.borrow() {
                            Some(Ok(())) => test.holds() == 0,
                            Some(Err(_)) => true,
                            None => false,
                        }
                },
                budget,
            )
        };

        if task.is_pending() {
            self.event_loop().cancel_task(&task);
        }

        if !test.is_terminal() {
            let result = slot.borrow_mut().take();
            let outcome = match (task.failure(), result) {
                (Some(message), _) => Outcome::Failed(HarnessError::BodyPanicked(message)),
                (None, Some(Err(err))) => Outcome::Failed(err),
                (None, Some(Ok(()))) if settled => Outcome::Passed,
                _ => Outcome::Failed(deadline_error(&test, budget)),
            };
            self.finish(&test, outcome);
        }

        Ok(test.report().unwrap_or_else(|| self.build_report(&test)))
    }
}

fn deadline_error(test: &TestCase, budget: Duration) -> HarnessError {
    HarnessError::TimedOut {
        what: format!("test '{}'", test.name()),
        after: budget,
    }
}

fn run_cleanup(test: &TestCase, index: usize, cleanup: Cleanup) {
    let failure = match catch_unwind(AssertUnwindSafe(cleanup)) {
        Ok(Ok(())) => None,
        Ok(Err(message)) => Some(message),
        Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
    };
    if let Some(message) = failure {
        test.warn(HarnessError::CleanupError { index, message });
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("active", &self.active_tests())
            .field("default_timeout", &self.inner.default_timeout)
            .finish()
    }
}
