//! Test reporter - display case results

use crate::testing::runner::CaseRun;
use chrono::Utc;
use colored::*;
use serde_json::json;
use std::io::{self, Write};
use std::time::Duration;
use vigil_runtime::Status;

/// Console reporter with output configuration
pub struct TestReporter {
    /// Show one line per case instead of one character
    verbose: bool,
    /// Disable colored output
    no_color: bool,
}

impl Default for TestReporter {
    fn default() -> Self {
        Self::new(false)
    }
}

impl TestReporter {
    /// Create a new test reporter
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            no_color: false,
        }
    }

    /// Disable colored output
    pub fn with_no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    /// Report case results
    pub fn report(&self, runs: &[CaseRun]) {
        if self.no_color {
            colored::control::set_override(false);
        }

        for run in runs {
            self.print_case_result(run);
        }

        // Dots need a newline before the summary
        if !self.verbose && !runs.is_empty() {
            println!();
        }

        println!();
        self.print_summary(runs);
        self.print_failures(runs);

        if self.no_color {
            colored::control::unset_override();
        }
    }

    fn print_case_result(&self, run: &CaseRun) {
        let (tag, dot) = match run.report.status {
            Status::Passed => ("PASS".green().bold(), ".".green()),
            Status::TimedOut => ("TIMEOUT".yellow().bold(), "T".yellow().bold()),
            _ => ("FAIL".red().bold(), "F".red().bold()),
        };
        if self.verbose {
            println!("{} {} ({:.2?})", tag, run.case.name, run.duration());
            for warning in &run.report.warnings {
                println!("    {} {}", "warning:".yellow(), warning);
            }
        } else {
            print!("{}", dot);
            let _ = io::stdout().flush();
        }
    }

    /// Print summary statistics
    fn print_summary(&self, runs: &[CaseRun]) {
        let total = runs.len();
        let passed = runs.iter().filter(|r| r.is_pass()).count();
        let failed = total - passed;

        let total_duration: Duration = runs.iter().map(CaseRun::duration).sum();

        println!("{}", "─".repeat(50));

        let status = if failed > 0 {
            "FAILED".red().bold()
        } else {
            "PASSED".green().bold()
        };

        println!(
            "Test result: {} | {} total, {} passed, {} failed",
            status,
            total.to_string().bold(),
            passed.to_string().green().bold(),
            if failed > 0 {
                failed.to_string().red().bold()
            } else {
                failed.to_string().normal()
            }
        );
        println!("Time: {:.2?}", total_duration);
    }

    /// Print details of failed cases
    fn print_failures(&self, runs: &[CaseRun]) {
        let failures: Vec<_> = runs.iter().filter(|r| r.is_fail()).collect();

        if failures.is_empty() {
            return;
        }

        println!();
        println!("{}", "Failures:".red().bold());
        println!();

        for run in failures {
            println!("  {} {} [{}]", "●".red(), run.case.name.bold(), run.report.status);
            println!("    {}", run.case.summary.dimmed());
            if let Some(message) = &run.report.message {
                for line in message.lines() {
                    println!("      {}", line.dimmed());
                }
            }
            println!();
        }
    }
}

/// Render runs as one JSON document
pub fn json_summary(runs: &[CaseRun], clock: &str) -> serde_json::Value {
    let passed = runs.iter().filter(|r| r.is_pass()).count();
    json!({
        "tests": runs.len(),
        "passed": passed,
        "failed": runs.len() - passed,
        "clock": clock,
        "generated_at": Utc::now().to_rfc3339(),
        "results": runs.iter().map(|r| &r.report).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::suite::SuiteCase;
    use vigil_runtime::{Harness, HarnessResult, TestReport};

    fn never_called(_: &Harness, _: &str) -> HarnessResult<TestReport> {
        unreachable!()
    }

    fn make_run(name: &'static str, status: Status, message: Option<&str>) -> CaseRun {
        CaseRun {
            case: SuiteCase {
                name,
                summary: "summary",
                run: never_called,
            },
            report: TestReport {
                name: name.to_string(),
                status,
                message: message.map(str::to_string),
                duration: Duration::from_millis(10),
                warnings: vec!["Cleanup #0 failed: busy".to_string()],
                finished_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_reporter_mixed_results() {
        let runs = vec![
            make_run("observer/ok", Status::Passed, None),
            make_run("timeout/slow", Status::TimedOut, Some("Timed out after 30ms")),
            make_run("harness/bad", Status::Failed, Some("Assertion failed: x")),
        ];

        TestReporter::new(true).with_no_color(true).report(&runs);
        TestReporter::new(false).with_no_color(true).report(&runs);
    }

    #[test]
    fn test_reporter_empty() {
        TestReporter::new(true).with_no_color(true).report(&[]);
    }

    #[test]
    fn test_json_summary_counts() {
        let runs = vec![
            make_run("a", Status::Passed, None),
            make_run("b", Status::TimedOut, Some("late")),
        ];
        let summary = json_summary(&runs, "virtual");

        assert_eq!(summary["tests"], 2);
        assert_eq!(summary["passed"], 1);
        assert_eq!(summary["failed"], 1);
        assert_eq!(summary["clock"], "virtual");
        assert_eq!(summary["results"][1]["status"], "timed_out");
        assert_eq!(summary["results"][0]["duration_ms"], 10);
    }
}
