//! Test runner - execute suite cases, each on an isolated harness

use crate::testing::suite::{SuiteCase, TestSuite};
use chrono::Utc;
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};
use vigil_runtime::error::panic_message;
use vigil_runtime::{ClockKind, Environment, Harness, Status, TestReport, TracingSink};

/// A completed case
#[derive(Debug, Clone)]
pub struct CaseRun {
    /// The case that was run
    pub case: SuiteCase,
    /// The case's report
    pub report: TestReport,
}

impl CaseRun {
    pub fn is_pass(&self) -> bool {
        self.report.passed()
    }

    pub fn is_fail(&self) -> bool {
        !self.report.passed()
    }

    pub fn duration(&self) -> Duration {
        self.report.duration
    }
}

/// Test runner with configuration
pub struct TestRunner {
    /// Whether to run cases on parallel workers
    parallel: bool,
    /// Budget for each case
    timeout: Duration,
    /// Clock each case's environment is built with
    clock: ClockKind,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    /// Create a runner with default settings
    pub fn new() -> Self {
        Self {
            parallel: false,
            timeout: vigil_runtime::DEFAULT_TIMEOUT,
            clock: ClockKind::System,
        }
    }

    /// Set whether to run cases in parallel
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the budget for each case
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: ClockKind) -> Self {
        self.clock = clock;
        self
    }

    /// Run every case in the suite; results keep suite order
    pub fn run(&self, suite: &TestSuite) -> Vec<CaseRun> {
        if self.parallel {
            suite
                .cases
                .par_iter()
                .map(|case| self.run_single_case(case))
                .collect()
        } else {
            suite
                .cases
                .iter()
                .map(|case| self.run_single_case(case))
                .collect()
        }
    }

    /// Run one case on a fresh environment owned by the current thread
    pub fn run_single_case(&self, case: &SuiteCase) -> CaseRun {
        let env = Environment::with_clock(self.clock);
        let harness = Harness::with_options(&env, Rc::new(TracingSink), self.timeout);
        let start = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| (case.run)(&harness, case.name)));
        env.shutdown();

        let report = match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => failed_report(case, err.to_string(), start.elapsed()),
            Err(payload) => failed_report(
                case,
                format!("case panicked: {}", panic_message(payload.as_ref())),
                start.elapsed(),
            ),
        };
        tracing::debug!(case = case.name, status = %report.status, "case finished");

        CaseRun {
            case: *case,
            report,
        }
    }
}

/// Report for a case that could not produce one through its harness
fn failed_report(case: &SuiteCase, message: String, duration: Duration) -> TestReport {
    TestReport {
        name: case.name.to_string(),
        status: Status::Failed,
        message: Some(message),
        duration,
        warnings: Vec::new(),
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_runtime::{HarnessError, HarnessResult};

    fn passing(h: &Harness, name: &str) -> HarnessResult<TestReport> {
        h.run(name, |_, _| async { Ok(()) })
    }

    fn failing(h: &Harness, name: &str) -> HarnessResult<TestReport> {
        h.run(name, |_, _| async {
            Err(HarnessError::AssertionFailed("expected failure".to_string()))
        })
    }

    fn refused(_: &Harness, name: &str) -> HarnessResult<TestReport> {
        Err(HarnessError::DuplicateTest {
            name: name.to_string(),
        })
    }

    fn broken(_: &Harness, name: &str) -> HarnessResult<TestReport> {
        panic!("fixture for {} is broken", name)
    }

    fn case(name: &'static str, run: crate::testing::suite::CaseFn) -> SuiteCase {
        SuiteCase {
            name,
            summary: "",
            run,
        }
    }

    #[test]
    fn test_runner_pass_and_fail() {
        let runner = TestRunner::new().with_clock(ClockKind::Virtual);

        assert!(runner.run_single_case(&case("ok", passing)).is_pass());
        let failed = runner.run_single_case(&case("bad", failing));
        assert!(failed.is_fail());
        assert_eq!(failed.report.status, Status::Failed);
    }

    #[test]
    fn test_runner_harness_error_becomes_failure() {
        let run = TestRunner::new().run_single_case(&case("refused", refused));

        assert!(run.is_fail());
        assert!(run
            .report
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("Duplicate test"));
    }

    #[test]
    fn test_runner_case_panic_becomes_failure() {
        let run = TestRunner::new()
            .with_clock(ClockKind::Virtual)
            .run_single_case(&case("broken", broken));

        assert_eq!(run.report.status, Status::Failed);
        assert_eq!(
            run.report.message.as_deref(),
            Some("case panicked: fixture for broken is broken")
        );
    }

    #[test]
    fn test_runner_parallel_keeps_order() {
        let suite = TestSuite {
            cases: vec![
                case("a", passing),
                case("b", failing),
                case("c", passing),
            ],
        };

        let runs = TestRunner::new()
            .with_parallel(true)
            .with_clock(ClockKind::Virtual)
            .run(&suite);

        let names: Vec<_> = runs.iter().map(|r| r.case.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(runs.iter().filter(|r| r.is_pass()).count(), 2);
    }

    #[test]
    fn test_builtin_suite_sequential_and_parallel() {
        let suite = TestSuite::builtin().filter("harness/");
        for parallel in [false, true] {
            let runs = TestRunner::new()
                .with_parallel(parallel)
                .with_timeout(Duration::from_secs(5))
                .run(&suite);
            assert!(runs.iter().all(CaseRun::is_pass), "{:?}", runs);
        }
    }
}
