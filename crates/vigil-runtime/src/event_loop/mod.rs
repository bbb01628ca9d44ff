//! Cooperative event loop driver
//!
//! This module provides the single scheduler every harness runs on:
//! - A FIFO ready queue of callbacks (`post_callback`)
//! - Timers ordered by deadline, then by insertion (`set_timeout`)
//! - `!Send` tasks polled cooperatively (`spawn_local`)
//! - Poll hooks run at the start of every quantum, used by event sources
//!   that live outside the loop
//!
//! One quantum dispatches exactly one ready callback. Nothing runs in
//! parallel; "concurrency" is interleaving of callbacks between quanta.
//! Timeouts are cooperative: deadlines are checked whenever the driver
//! considers dispatching, never by preemption.

pub mod task;

pub use task::{TaskHandle, TaskId, TaskStatus};

use crate::clock::Clock;
use crate::error::panic_message;
use futures_util::FutureExt;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use task::{TaskSlot, TaskState, TaskWaker};
use tokio::sync::mpsc;

/// How long the loop waits in real time for input from other threads
/// before re-checking its sources
pub const EXTERNAL_POLL: Duration = Duration::from_millis(1);

/// A unit of work queued on the loop
pub type Callback = Box<dyn FnOnce()>;

/// Identifier of a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Identifier of a registered poll hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// A poll hook returns `true` while it is still expecting input from
/// outside the loop (another thread or process)
type PollHook = Rc<dyn Fn() -> bool>;

struct LoopInner {
    clock: Rc<dyn Clock>,
    ready: RefCell<VecDeque<Callback>>,
    timers: RefCell<BTreeMap<(Duration, u64), Callback>>,
    timer_deadlines: RefCell<HashMap<u64, Duration>>,
    hooks: RefCell<Vec<(HookId, PollHook)>>,
    tasks: RefCell<HashMap<TaskId, Rc<TaskSlot>>>,
    wake_tx: mpsc::UnboundedSender<TaskId>,
    wake_rx: RefCell<mpsc::UnboundedReceiver<TaskId>>,
    next_id: Cell<u64>,
    dispatched: Cell<u64>,
    expecting_external: Cell<bool>,
    shut_down: Cell<bool>,
}

/// The cooperative scheduler shared by everything in one harness instance
///
/// Cloning the handle shares the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Create a loop driven by `clock`
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            inner: Rc::new(LoopInner {
                clock,
                ready: RefCell::new(VecDeque::new()),
                timers: RefCell::new(BTreeMap::new()),
                timer_deadlines: RefCell::new(HashMap::new()),
                hooks: RefCell::new(Vec::new()),
                tasks: RefCell::new(HashMap::new()),
                wake_tx,
                wake_rx: RefCell::new(wake_rx),
                next_id: Cell::new(1),
                dispatched: Cell::new(0),
                expecting_external: Cell::new(false),
                shut_down: Cell::new(false),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    fn downgrade(&self) -> Weak<LoopInner> {
        Rc::downgrade(&self.inner)
    }

    fn from_weak(weak: &Weak<LoopInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Current time on this loop's clock
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// The clock driving this loop
    pub fn clock(&self) -> Rc<dyn Clock> {
        Rc::clone(&self.inner.clock)
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.get()
    }

    /// Enqueue `callback` to run on a future loop iteration
    pub fn post_callback(&self, callback: impl FnOnce() + 'static) {
        if self.is_shut_down() {
            tracing::debug!("callback posted after loop shutdown; dropped");
            return;
        }
        self.inner.ready.borrow_mut().push_back(Box::new(callback));
    }

    /// Run `callback` once `delay` has elapsed
    pub fn set_timeout(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let seq = self.next_id();
        if self.is_shut_down() {
            tracing::debug!("timer set after loop shutdown; dropped");
            return TimerId(seq);
        }
        let deadline = self.now() + delay;
        self.inner
            .timers
            .borrow_mut()
            .insert((deadline, seq), Box::new(callback));
        self.inner.timer_deadlines.borrow_mut().insert(seq, deadline);
        TimerId(seq)
    }

    /// Cancel a timer that has not fired yet
    ///
    /// Returns false if the timer already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let deadline = self.inner.timer_deadlines.borrow_mut().remove(&id.0);
        match deadline {
            Some(deadline) => {
                let callback = self.inner.timers.borrow_mut().remove(&(deadline, id.0));
                drop(callback);
                true
            }
            None => false,
        }
    }

    /// Register a hook that runs at the start of every quantum
    pub fn add_poll_hook(&self, hook: impl Fn() -> bool + 'static) -> HookId {
        let id = HookId(self.next_id());
        self.inner.hooks.borrow_mut().push((id, Rc::new(hook)));
        id
    }

    /// Remove a poll hook; returns false if it was not registered
    pub fn remove_poll_hook(&self, id: HookId) -> bool {
        let mut hooks = self.inner.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(hid, _)| *hid != id);
        hooks.len() != before
    }

    /// Spawn a `!Send` future on the loop
    ///
    /// The first poll is queued immediately, behind whatever is already ready.
    pub fn spawn_local<F>(&self, name: Option<String>, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + 'static,
    {
        let id = TaskId(self.next_id());
        let state = Rc::new(TaskState::new(id, name));
        let handle = TaskHandle {
            state: Rc::clone(&state),
        };
        if self.is_shut_down() {
            state.cancel();
            return handle;
        }

        let slot = Rc::new(TaskSlot::new(state, future.boxed_local()));
        self.inner.tasks.borrow_mut().insert(id, slot);
        self.schedule_poll(id);
        handle
    }

    /// Cancel a task and drop its future now
    ///
    /// If the task is in the middle of its own poll, the future is dropped as
    /// soon as that poll returns.
    pub fn cancel_task(&self, handle: &TaskHandle) {
        if !handle.state.cancel() {
            return;
        }
        let slot = self.inner.tasks.borrow_mut().remove(&handle.id());
        if let Some(slot) = slot {
            let future = slot.future.borrow_mut().take();
            drop(future);
        }
    }

    /// Number of tasks that have not finished
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Number of callbacks waiting in the ready queue
    pub fn pending_callbacks(&self) -> usize {
        self.inner.ready.borrow().len()
    }

    /// Number of timers that have not fired
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Total callbacks dispatched since the loop was created
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.get()
    }

    /// Deadline of the earliest pending timer
    pub fn next_timer_deadline(&self) -> Option<Duration> {
        self.inner.timers.borrow().keys().next().map(|(deadline, _)| *deadline)
    }

    fn schedule_poll(&self, id: TaskId) {
        let slot = self.inner.tasks.borrow().get(&id).cloned();
        let Some(slot) = slot else {
            return;
        };
        if slot.queued.replace(true) {
            return;
        }
        let weak = self.downgrade();
        self.post_callback(move || {
            if let Some(ev) = EventLoop::from_weak(&weak) {
                ev.poll_task(id);
            }
        });
    }

    fn poll_task(&self, id: TaskId) {
        let slot = self.inner.tasks.borrow().get(&id).cloned();
        let Some(slot) = slot else {
            return;
        };
        slot.queued.set(false);

        if slot.state.status() != TaskStatus::Running {
            self.inner.tasks.borrow_mut().remove(&id);
            return;
        }

        let future = slot.future.borrow_mut().take();
        let Some(mut future) = future else {
            // Woken from inside its own poll (nested pumping)
            slot.rewake.set(true);
            return;
        };

        let waker = futures_util::task::waker(Arc::new(TaskWaker {
            id,
            wakes: self.inner.wake_tx.clone(),
        }));
        let mut cx = Context::from_waker(&waker);

        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Ready(())) => {
                slot.state.complete();
                self.inner.tasks.borrow_mut().remove(&id);
            }
            Ok(Poll::Pending) => {
                if slot.state.status() == TaskStatus::Running {
                    *slot.future.borrow_mut() = Some(future);
                    if slot.rewake.replace(false) {
                        self.schedule_poll(id);
                    }
                } else {
                    self.inner.tasks.borrow_mut().remove(&id);
                    drop(future);
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(task = %id, panic = %message, "task panicked");
                slot.state.fail(message);
                self.inner.tasks.borrow_mut().remove(&id);
            }
        }
    }

    fn run_hooks(&self) {
        let hooks: Vec<PollHook> = self
            .inner
            .hooks
            .borrow()
            .iter()
            .map(|(_, hook)| Rc::clone(hook))
            .collect();
        let mut expecting = false;
        for hook in hooks {
            expecting |= hook();
        }
        self.inner.expecting_external.set(expecting);
    }

    fn drain_wakes(&self) {
        loop {
            let next = self.inner.wake_rx.borrow_mut().try_recv();
            match next {
                Ok(id) => self.schedule_poll(id),
                Err(_) => break,
            }
        }
    }

    fn fire_due_timers(&self) {
        let now = self.now();
        loop {
            let key = match self.inner.timers.borrow().keys().next() {
                Some(&key) if key.0 <= now => key,
                _ => break,
            };
            let callback = self.inner.timers.borrow_mut().remove(&key);
            self.inner.timer_deadlines.borrow_mut().remove(&key.1);
            if let Some(callback) = callback {
                self.inner.ready.borrow_mut().push_back(callback);
            }
        }
    }

    /// Run one loop quantum
    ///
    /// Polls event sources, moves due timers and woken tasks into the ready
    /// queue, then dispatches exactly one ready callback. Returns false when
    /// there was nothing ready to dispatch.
    pub fn run_once(&self) -> bool {
        if self.is_shut_down() {
            return false;
        }
        self.run_hooks();
        self.drain_wakes();
        self.fire_due_timers();

        let next = self.inner.ready.borrow_mut().pop_front();
        let Some(callback) = next else {
            return false;
        };
        self.inner.dispatched.set(self.inner.dispatched.get() + 1);
        tracing::trace!(quantum = self.inner.dispatched.get(), "dispatch");
        if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
            tracing::error!(panic = %panic_message(payload.as_ref()), "loop callback panicked");
        }
        true
    }

    /// Let time pass toward `target` while nothing is ready
    fn idle_toward(&self, target: Duration) {
        let clock = &self.inner.clock;
        if self.inner.expecting_external.get() {
            let step = (clock.now() + EXTERNAL_POLL).min(target);
            if clock.is_virtual() {
                std::thread::sleep(EXTERNAL_POLL);
            }
            clock.idle_until(step);
        } else {
            clock.idle_until(target);
        }
    }

    /// Drive the loop until `predicate` holds or `timeout` elapses
    ///
    /// Returns whether the predicate was satisfied. The predicate is checked
    /// before every quantum, so a predicate that already holds returns
    /// without dispatching anything.
    pub fn pump_until(&self, mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = self.now() + timeout;
        loop {
            if predicate() {
                return true;
            }
            if self.is_shut_down() || self.now() >= deadline {
                return false;
            }
            if self.run_once() {
                continue;
            }
            let target = self
                .next_timer_deadline()
                .map_or(deadline, |next| next.min(deadline));
            self.idle_toward(target);
        }
    }

    /// Dispatch everything that is ready without letting time pass
    ///
    /// Returns the number of callbacks dispatched.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.run_once() {
            count += 1;
        }
        count
    }

    /// Tear the loop down
    ///
    /// Drops every queued callback, timer, hook and task. Later posts are
    /// ignored.
    pub fn shutdown(&self) {
        if self.inner.shut_down.replace(true) {
            return;
        }
        let ready: Vec<Callback> = self.inner.ready.borrow_mut().drain(..).collect();
        let timers = std::mem::take(&mut *self.inner.timers.borrow_mut());
        self.inner.timer_deadlines.borrow_mut().clear();
        let hooks = std::mem::take(&mut *self.inner.hooks.borrow_mut());
        let tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
        for slot in tasks.values() {
            slot.state.cancel();
        }
        tracing::debug!(
            callbacks = ready.len(),
            timers = timers.len(),
            tasks = tasks.len(),
            "event loop shut down"
        );
        drop(ready);
        drop(timers);
        drop(hooks);
        drop(tasks);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("now", &self.now())
            .field("ready", &self.pending_callbacks())
            .field("timers", &self.pending_timers())
            .field("tasks", &self.task_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
