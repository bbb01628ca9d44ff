//! Vigil Runtime - asynchronous test orchestration
//!
//! This library provides everything needed to run tests whose work completes
//! later, through callbacks, observer notifications, or other threads:
//! - A cooperative single-threaded event loop with timers and local tasks
//! - A topic-based observer registry with deferred mutation during dispatch
//! - Real and simulated clocks
//! - The async test harness: pending waits, holds, cleanups, one report per test
//! - Assertion helpers, crash-artifact views, spinning callbacks and
//!   dual-path completion probes for writing test bodies

/// Vigil runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod assert;
pub mod clock;
pub mod crash;
pub mod dual_path;
pub mod error;
pub mod event_loop;
pub mod harness;
pub mod logging;
pub mod observer;
pub mod operation;
pub mod report;
pub mod spinning;

// Re-export commonly used types
pub use clock::{Clock, ClockKind, SystemClock, VirtualClock};
pub use crash::{await_crash, CrashArtifact, CRASH_TOPIC};
pub use dual_path::DualPathProbe;
pub use error::{HarnessError, HarnessResult};
pub use event_loop::{EventLoop, TaskHandle, TaskId, TaskStatus, TimerId};
pub use harness::{Environment, Harness, HoldGuard, Outcome, Status, TestCase, DEFAULT_TIMEOUT};
pub use observer::{ObserverRegistry, Payload, RemotePublisher, SubscriptionId};
pub use operation::{Expectation, OperationState, PendingOperation};
pub use report::{MemorySink, ReportSink, TestReport, TracingSink};
pub use spinning::{next_tick, spin_until_complete, Completer, SpinningCallback};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
