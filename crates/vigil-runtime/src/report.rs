//! Result reporting
//!
//! Every test yields exactly one [`TestReport`], handed to the harness's
//! [`ReportSink`] at the end of teardown.

use crate::harness::Status;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Terminal outcome of one test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestReport {
    pub name: String,
    pub status: Status,
    /// Error rendered for failed and timed-out tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl TestReport {
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

/// Destination for test reports
pub trait ReportSink {
    fn report_result(&self, report: &TestReport);
}

/// Emits one `tracing` event per report
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn report_result(&self, report: &TestReport) {
        let duration_ms = report.duration.as_millis() as u64;
        match report.status {
            Status::Passed => {
                tracing::info!(test = %report.name, duration_ms, "PASS");
            }
            status => {
                tracing::warn!(
                    test = %report.name,
                    %status,
                    duration_ms,
                    message = report.message.as_deref().unwrap_or(""),
                    "FAIL"
                );
            }
        }
        for warning in &report.warnings {
            tracing::warn!(test = %report.name, warning = %warning, "harness warning");
        }
    }
}

/// Collects reports in memory; clones share the same buffer
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    reports: Rc<RefCell<Vec<TestReport>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every report received so far
    pub fn reports(&self) -> Vec<TestReport> {
        self.reports.borrow().clone()
    }

    /// Reports received for `name`
    pub fn reports_for(&self, name: &str) -> Vec<TestReport> {
        self.reports
            .borrow()
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.reports.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.borrow().is_empty()
    }
}

impl ReportSink for MemorySink {
    fn report_result(&self, report: &TestReport) {
        self.reports.borrow_mut().push(report.clone());
    }
}
