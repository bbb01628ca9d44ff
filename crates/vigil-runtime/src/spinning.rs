//! Synchronous waits on callback-style APIs
//!
//! A [`SpinningCallback`] hands out a [`Completer`] to a callback-based
//! operation and then pumps the loop until the completer has been invoked,
//! turning the callback result into a plain return value. Nested spinning
//! from inside a loop callback is allowed.

use crate::error::{HarnessError, HarnessResult};
use crate::event_loop::EventLoop;
use crate::observer::Payload;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Shared {
    result: RefCell<Option<HarnessResult<Payload>>>,
    calls: Cell<usize>,
}

/// Completion side of a spinning callback
///
/// Only the first completion counts; later ones are ignored.
#[derive(Clone)]
pub struct Completer {
    shared: Rc<Shared>,
}

impl Completer {
    /// Deliver the operation's result
    pub fn complete(&self, result: HarnessResult<Payload>) {
        let calls = self.shared.calls.get() + 1;
        self.shared.calls.set(calls);
        if calls > 1 {
            tracing::debug!(calls, "spinning callback invoked again; ignored");
            return;
        }
        *self.shared.result.borrow_mut() = Some(result);
    }

    pub fn succeed(&self, payload: Payload) {
        self.complete(Ok(payload));
    }

    pub fn fail(&self, message: impl fmt::Display) {
        self.complete(Err(HarnessError::body(message)));
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("calls", &self.shared.calls.get())
            .finish()
    }
}

/// Blocks (by pumping the loop) until a callback fires
pub struct SpinningCallback {
    event_loop: EventLoop,
    shared: Rc<Shared>,
}

impl SpinningCallback {
    pub fn new(event_loop: &EventLoop) -> Self {
        Self {
            event_loop: event_loop.clone(),
            shared: Rc::new(Shared::default()),
        }
    }

    /// A completer to pass to the callback-based operation
    pub fn callback(&self) -> Completer {
        Completer {
            shared: Rc::clone(&self.shared),
        }
    }

    pub fn is_done(&self) -> bool {
        self.shared.result.borrow().is_some()
    }

    /// How many times the completer has been invoked
    pub fn calls(&self) -> usize {
        self.shared.calls.get()
    }

    /// Pump the loop until the callback fires or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> HarnessResult<Payload> {
        let shared = Rc::clone(&self.shared);
        let done = self
            .event_loop
            .pump_until(move || shared.result.borrow().is_some(), timeout);
        if !done {
            return Err(HarnessError::TimedOut {
                what: "spinning callback".to_string(),
                after: timeout,
            });
        }
        self.shared
            .result
            .borrow()
            .clone()
            .unwrap_or(Err(HarnessError::Cancelled))
    }
}

impl fmt::Debug for SpinningCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinningCallback")
            .field("done", &self.is_done())
            .field("calls", &self.calls())
            .finish()
    }
}

/// Start a callback-based operation and spin until it completes
pub fn spin_until_complete(
    event_loop: &EventLoop,
    timeout: Duration,
    start: impl FnOnce(Completer),
) -> HarnessResult<Payload> {
    let spinner = SpinningCallback::new(event_loop);
    start(spinner.callback());
    spinner.wait(timeout)
}

/// Run `f` on the next loop quantum
pub fn next_tick(event_loop: &EventLoop, f: impl FnOnce() + 'static) {
    event_loop.post_callback(f);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use serde_json::json;

    fn event_loop() -> EventLoop {
        EventLoop::new(Rc::new(VirtualClock::new()))
    }

    #[test]
    fn test_wait_returns_callback_payload() {
        let ev = event_loop();
        let spinner = SpinningCallback::new(&ev);
        let done = spinner.callback();
        next_tick(&ev, move || done.succeed(json!(["row1", "row2"])));

        assert_eq!(spinner.wait(Duration::from_secs(1)), Ok(json!(["row1", "row2"])));
        assert_eq!(ev.now(), Duration::ZERO);
    }

    #[test]
    fn test_second_invocation_is_ignored() {
        let ev = event_loop();
        let result = spin_until_complete(&ev, Duration::from_secs(1), |done| {
            let again = done.clone();
            ev.set_timeout(Duration::from_millis(3), move || done.succeed(json!(1)));
            ev.set_timeout(Duration::from_millis(4), move || again.succeed(json!(2)));
        });
        assert_eq!(result, Ok(json!(1)));

        ev.run_until_idle();
        ev.pump_until(|| false, Duration::from_millis(5));
        assert_eq!(ev.pending_timers(), 0);
    }

    #[test]
    fn test_error_is_returned() {
        let ev = event_loop();
        let result = spin_until_complete(&ev, Duration::from_secs(1), |done| {
            next_tick(&ev, move || done.fail("database locked"));
        });
        assert_eq!(result, Err(HarnessError::Body("database locked".to_string())));
    }

    #[test]
    fn test_wait_times_out() {
        let ev = event_loop();
        let spinner = SpinningCallback::new(&ev);
        let err = spinner.wait(Duration::from_millis(40)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(ev.now(), Duration::from_millis(40));
        assert_eq!(spinner.calls(), 0);
    }

    #[test]
    fn test_nested_spin_inside_callback() {
        let ev = event_loop();
        let outer = SpinningCallback::new(&ev);
        let outer_done = outer.callback();
        let inner_loop = ev.clone();
        next_tick(&ev, move || {
            let inner = spin_until_complete(&inner_loop, Duration::from_secs(1), |done| {
                next_tick(&inner_loop, move || done.succeed(json!("inner")));
            });
            outer_done.complete(inner.map(|v| json!({"wrapped": v})));
        });

        assert_eq!(
            outer.wait(Duration::from_secs(1)),
            Ok(json!({"wrapped": "inner"}))
        );
    }
}
