//! Pending operations
//!
//! A `PendingOperation` is one outstanding wait owned by a test: for a topic
//! notification (optionally filtered on its payload) or for a condition that
//! is probed at the start of every loop quantum. Each operation also arms a
//! timer for its budget.
//!
//! # State Machine
//! - Pending → Resolved (matching event or condition)
//! - Pending → TimedOut (timer fired first)
//! - Pending → Cancelled (test teardown)
//! - The first transition wins; every later event is discarded
//!
//! The outcome is delivered once over a oneshot channel. Whichever transition
//! happens, every registration (subscription, timer, probe hook) is released
//! before the transition method returns.

use crate::error::{HarnessError, HarnessResult};
use crate::event_loop::{HookId, TimerId};
use crate::observer::{ObserverRegistry, Payload, SubscriptionId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

type PayloadFilter = Rc<dyn Fn(&Payload) -> bool>;
type ConditionProbe = Rc<dyn Fn() -> Option<Payload>>;

/// What a pending operation is waiting for
#[derive(Clone)]
pub enum Expectation {
    /// A notification on `topic` whose payload passes `filter`, if any
    Topic {
        topic: String,
        filter: Option<PayloadFilter>,
    },
    /// A probe that yields a payload once the awaited condition holds
    Condition { label: String, probe: ConditionProbe },
}

impl Expectation {
    /// Wait for any notification on `topic`
    pub fn topic(topic: impl Into<String>) -> Self {
        Expectation::Topic {
            topic: topic.into(),
            filter: None,
        }
    }

    /// Wait until `probe` returns a payload
    pub fn condition(
        label: impl Into<String>,
        probe: impl Fn() -> Option<Payload> + 'static,
    ) -> Self {
        Expectation::Condition {
            label: label.into(),
            probe: Rc::new(probe),
        }
    }

    /// Wait until `predicate` holds; resolves with `null`
    pub fn when(label: impl Into<String>, predicate: impl Fn() -> bool + 'static) -> Self {
        Self::condition(label, move || predicate().then_some(Payload::Null))
    }

    /// Only accept payloads for which `filter` returns true
    ///
    /// For a condition the filter is applied to the probed payload.
    pub fn matching(self, filter: impl Fn(&Payload) -> bool + 'static) -> Self {
        match self {
            Expectation::Topic { topic, filter: old } => {
                let filter: PayloadFilter = match old {
                    Some(old) => Rc::new(move |p: &Payload| old(p) && filter(p)),
                    None => Rc::new(filter),
                };
                Expectation::Topic {
                    topic,
                    filter: Some(filter),
                }
            }
            Expectation::Condition { label, probe } => Expectation::Condition {
                label,
                probe: Rc::new(move || probe().filter(|p| filter(p))),
            },
        }
    }

    /// Human-readable description used in timeout messages
    pub fn describe(&self) -> String {
        match self {
            Expectation::Topic {
                topic,
                filter: None,
            } => format!("topic '{}'", topic),
            Expectation::Topic { topic, .. } => format!("matching event on topic '{}'", topic),
            Expectation::Condition { label, .. } => format!("condition '{}'", label),
        }
    }
}

impl From<&str> for Expectation {
    fn from(topic: &str) -> Self {
        Expectation::topic(topic)
    }
}

impl From<String> for Expectation {
    fn from(topic: String) -> Self {
        Expectation::topic(topic)
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expectation({})", self.describe())
    }
}

/// Lifecycle state of a pending operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Pending,
    Resolved(Payload),
    TimedOut,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::Pending)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Pending => write!(f, "pending"),
            OperationState::Resolved(_) => write!(f, "resolved"),
            OperationState::TimedOut => write!(f, "timed out"),
            OperationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Receiving half handed to the awaiting body
pub type Completion = oneshot::Receiver<HarnessResult<Payload>>;

/// One outstanding asynchronous wait
pub struct PendingOperation {
    expectation: Expectation,
    timeout: Duration,
    state: RefCell<OperationState>,
    sender: RefCell<Option<oneshot::Sender<HarnessResult<Payload>>>>,
    registry: ObserverRegistry,
    subscription: Cell<Option<SubscriptionId>>,
    timer: Cell<Option<TimerId>>,
    hook: Cell<Option<HookId>>,
}

impl PendingOperation {
    /// Register a wait on `registry`'s loop
    ///
    /// A condition that already holds resolves before this returns.
    pub fn arm(
        registry: &ObserverRegistry,
        expectation: Expectation,
        timeout: Duration,
    ) -> (Rc<Self>, Completion) {
        let (tx, rx) = oneshot::channel();
        let op = Rc::new(Self {
            expectation: expectation.clone(),
            timeout,
            state: RefCell::new(OperationState::Pending),
            sender: RefCell::new(Some(tx)),
            registry: registry.clone(),
            subscription: Cell::new(None),
            timer: Cell::new(None),
            hook: Cell::new(None),
        });
        let event_loop = registry.event_loop();

        let weak = Rc::downgrade(&op);
        let timer = event_loop.set_timeout(timeout, move || {
            if let Some(op) = weak.upgrade() {
                op.time_out();
            }
        });
        op.timer.set(Some(timer));

        match expectation {
            Expectation::Topic { topic, filter } => {
                let weak: Weak<Self> = Rc::downgrade(&op);
                let id = registry.subscribe(&topic, move |_, payload| {
                    let accepted = filter.as_ref().map_or(true, |f| f(payload));
                    if !accepted {
                        return;
                    }
                    if let Some(op) = weak.upgrade() {
                        op.resolve(payload.clone());
                    }
                });
                op.subscription.set(Some(id));
            }
            Expectation::Condition { probe, .. } => {
                if let Some(payload) = probe() {
                    op.resolve(payload);
                } else {
                    let weak: Weak<Self> = Rc::downgrade(&op);
                    let hook = event_loop.add_poll_hook(move || {
                        if let Some(op) = weak.upgrade() {
                            if let Some(payload) = probe() {
                                op.resolve(payload);
                            }
                        }
                        false
                    });
                    op.hook.set(Some(hook));
                }
            }
        }

        tracing::debug!(expectation = %op.expectation.describe(), ?timeout, "operation armed");
        (op, rx)
    }

    pub fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current state (cloned)
    pub fn state(&self) -> OperationState {
        self.state.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), OperationState::Pending)
    }

    /// The resolution value, once resolved
    pub fn resolution(&self) -> Option<Payload> {
        match &*self.state.borrow() {
            OperationState::Resolved(payload) => Some(payload.clone()),
            _ => None,
        }
    }

    /// Complete with `payload`; ignored unless still pending
    pub fn resolve(&self, payload: Payload) -> bool {
        self.transition(OperationState::Resolved(payload.clone()), Ok(payload))
    }

    /// Complete with `TimedOut`; ignored unless still pending
    pub fn time_out(&self) -> bool {
        let error = HarnessError::TimedOut {
            what: self.expectation.describe(),
            after: self.timeout,
        };
        self.transition(OperationState::TimedOut, Err(error))
    }

    /// Abandon the wait; ignored unless still pending
    pub fn cancel(&self) -> bool {
        self.transition(OperationState::Cancelled, Err(HarnessError::Cancelled))
    }

    fn transition(&self, next: OperationState, outcome: HarnessResult<Payload>) -> bool {
        {
            let mut state = self.state.borrow_mut();
            if state.is_terminal() {
                return false;
            }
            *state = next;
        }
        self.disarm();
        tracing::debug!(
            expectation = %self.expectation.describe(),
            state = %self.state.borrow(),
            "operation settled"
        );
        if let Some(sender) = self.sender.borrow_mut().take() {
            // The awaiting body may already be gone
            let _ = sender.send(outcome);
        }
        true
    }

    fn disarm(&self) {
        if let Some(id) = self.subscription.take() {
            if let Err(err) = self.registry.unsubscribe(id) {
                tracing::debug!(error = %err, "operation subscription already released");
            }
        }
        let event_loop = self.registry.event_loop();
        if let Some(timer) = self.timer.take() {
            event_loop.clear_timeout(timer);
        }
        if let Some(hook) = self.hook.take() {
            event_loop.remove_poll_hook(hook);
        }
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("expectation", &self.expectation)
            .field("timeout", &self.timeout)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Operation({}, {})",
            self.expectation.describe(),
            self.state.borrow()
        )
    }
}
