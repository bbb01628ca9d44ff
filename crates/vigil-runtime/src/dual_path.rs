//! Dual-path completion probe
//!
//! Some initialization APIs report completion twice: once through their
//! synchronous return value and once through a callback fired later. The
//! probe records both channels and checks that they agree. Neither channel
//! is treated as authoritative; a missing channel is a failure.

use crate::error::{HarnessError, HarnessResult};
use crate::harness::{Harness, TestCase};
use crate::observer::Payload;
use crate::operation::Expectation;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

struct ProbeState {
    label: String,
    sync: RefCell<Option<Payload>>,
    callback: RefCell<Option<Payload>>,
}

/// Records the synchronous and callback-delivered results of one operation
///
/// Clones share the same recordings.
#[derive(Clone)]
pub struct DualPathProbe {
    state: Rc<ProbeState>,
}

impl DualPathProbe {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            state: Rc::new(ProbeState {
                label: label.into(),
                sync: RefCell::new(None),
                callback: RefCell::new(None),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.state.label
    }

    /// Record the value returned synchronously; the first recording wins
    pub fn record_sync(&self, payload: Payload) {
        let mut sync = self.state.sync.borrow_mut();
        if sync.is_none() {
            *sync = Some(payload);
        }
    }

    /// Record the value delivered to the callback; the first delivery wins
    pub fn record_callback(&self, payload: Payload) {
        let mut callback = self.state.callback.borrow_mut();
        if callback.is_none() {
            *callback = Some(payload);
        }
    }

    /// A callback suitable for handing to the operation under test
    pub fn callback(&self) -> impl Fn(Payload) + Clone + 'static {
        let probe = self.clone();
        move |payload| probe.record_callback(payload)
    }

    pub fn sync_result(&self) -> Option<Payload> {
        self.state.sync.borrow().clone()
    }

    pub fn callback_result(&self) -> Option<Payload> {
        self.state.callback.borrow().clone()
    }

    /// Succeed with the common value when both channels reported the same thing
    pub fn agree(&self) -> HarnessResult<Payload> {
        let label = &self.state.label;
        match (self.sync_result(), self.callback_result()) {
            (Some(sync), Some(callback)) if sync == callback => Ok(sync),
            (Some(sync), Some(callback)) => Err(HarnessError::AssertionFailed(format!(
                "{}: synchronous result {} disagrees with callback result {}",
                label, sync, callback
            ))),
            (None, _) => Err(HarnessError::AssertionFailed(format!(
                "{}: no synchronous result was recorded",
                label
            ))),
            (_, None) => Err(HarnessError::AssertionFailed(format!(
                "{}: callback never delivered a result",
                label
            ))),
        }
    }

    /// Wait for the callback channel, then check agreement
    pub fn await_agreement(
        &self,
        harness: &Harness,
        test: &TestCase,
        timeout: Duration,
    ) -> impl Future<Output = HarnessResult<Payload>> + 'static {
        let watched = self.clone();
        let expectation = Expectation::condition(format!("{} callback", self.label()), move || {
            watched.callback_result()
        });
        let arrival = harness.await_operation(test, expectation, timeout);
        let probe = self.clone();
        async move {
            arrival.await?;
            probe.agree()
        }
    }
}

impl fmt::Debug for DualPathProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualPathProbe")
            .field("label", &self.state.label)
            .field("sync", &*self.state.sync.borrow())
            .field("callback", &*self.state.callback.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{Environment, Status};
    use serde_json::json;

    #[test]
    fn test_agree_requires_both_channels() {
        let probe = DualPathProbe::new("search init");
        assert!(probe.agree().is_err());

        probe.record_sync(json!("ok"));
        let err = probe.agree().unwrap_err();
        assert!(err.to_string().contains("callback never delivered"));

        probe.callback()(json!("ok"));
        assert_eq!(probe.agree(), Ok(json!("ok")));
    }

    #[test]
    fn test_disagreement_is_reported() {
        let probe = DualPathProbe::new("engine count");
        probe.record_sync(json!(3));
        probe.record_callback(json!(4));
        probe.record_callback(json!(3));

        assert_eq!(probe.callback_result(), Some(json!(4)));
        assert!(probe.agree().unwrap_err().to_string().contains("disagrees"));
    }

    #[test]
    fn test_missing_sync_result() {
        let probe = DualPathProbe::new("init");
        probe.record_callback(json!(true));
        assert!(probe.agree().unwrap_err().to_string().contains("no synchronous result"));
    }

    #[test]
    fn test_await_agreement_in_harness() {
        let env = Environment::virtual_time();
        let harness = Harness::new(&env);
        let report = harness
            .run("sync fallback", |h, test| async move {
                let probe = DualPathProbe::new("search service init");
                let deliver = probe.callback();
                h.event_loop()
                    .set_timeout(Duration::from_millis(15), move || deliver(json!("initialized")));
                probe.record_sync(json!("initialized"));

                let value = probe
                    .await_agreement(&h, &test, Duration::from_secs(1))
                    .await?;
                crate::check_eq!(value, json!("initialized"));
                Ok(())
            })
            .unwrap();
        assert_eq!(report.status, Status::Passed);
        assert_eq!(report.duration, Duration::from_millis(15));
    }
}
