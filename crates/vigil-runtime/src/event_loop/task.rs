//! Task spawning and management for the event loop
//!
//! Tasks are `!Send` futures polled cooperatively by the loop. A woken task
//! is queued as an ordinary ready callback, so task polls interleave with
//! timers and observer dispatches in a single FIFO order.

use futures_util::future::LocalBoxFuture;
use futures_util::task::ArcWake;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of a spawned task, unique within its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is still being polled
    Running,
    /// Task ran to completion
    Completed,
    /// Task was cancelled before completing
    Cancelled,
    /// Task panicked while being polled
    Failed,
}

/// State shared between a TaskHandle and the loop
pub(crate) struct TaskState {
    id: TaskId,
    name: Option<String>,
    status: Cell<TaskStatus>,
    failure: RefCell<Option<String>>,
}

impl TaskState {
    pub(crate) fn new(id: TaskId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            status: Cell::new(TaskStatus::Running),
            failure: RefCell::new(None),
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.status.get()
    }

    pub(crate) fn complete(&self) {
        if self.status.get() == TaskStatus::Running {
            self.status.set(TaskStatus::Completed);
        }
    }

    pub(crate) fn fail(&self, message: String) {
        if self.status.get() == TaskStatus::Running {
            self.status.set(TaskStatus::Failed);
            *self.failure.borrow_mut() = Some(message);
        }
    }

    pub(crate) fn cancel(&self) -> bool {
        if self.status.get() == TaskStatus::Running {
            self.status.set(TaskStatus::Cancelled);
            true
        } else {
            false
        }
    }
}

/// Loop-side storage for a spawned task
pub(crate) struct TaskSlot {
    pub(crate) state: Rc<TaskState>,
    /// Taken out while the task is being polled
    pub(crate) future: RefCell<Option<LocalBoxFuture<'static, ()>>>,
    /// A poll callback is already sitting in the ready queue
    pub(crate) queued: Cell<bool>,
    /// Woken while its own poll was still on the stack
    pub(crate) rewake: Cell<bool>,
}

impl TaskSlot {
    pub(crate) fn new(state: Rc<TaskState>, future: LocalBoxFuture<'static, ()>) -> Self {
        Self {
            state,
            future: RefCell::new(Some(future)),
            queued: Cell::new(false),
            rewake: Cell::new(false),
        }
    }
}

/// Waker that routes wake-ups back to the owning loop
///
/// Wakers must be `Send + Sync`, so a wake only enqueues the task id on a
/// channel; the loop drains it at the start of each quantum.
pub(crate) struct TaskWaker {
    pub(crate) id: TaskId,
    pub(crate) wakes: mpsc::UnboundedSender<TaskId>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        // The loop may already be gone; nothing left to wake then.
        let _ = arc_self.wakes.send(arc_self.id);
    }
}

/// Handle to a spawned task
///
/// Provides status checks for a task running on the loop. Cancelling
/// through the handle only marks the task; [`crate::EventLoop::cancel_task`]
/// also drops its future immediately.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) state: Rc<TaskState>,
}

impl TaskHandle {
    /// Get task ID
    pub fn id(&self) -> TaskId {
        self.state.id
    }

    /// Get task name
    pub fn name(&self) -> Option<&str> {
        self.state.name.as_deref()
    }

    /// Get current task status
    pub fn status(&self) -> TaskStatus {
        self.state.status()
    }

    /// Check if task is still running
    pub fn is_pending(&self) -> bool {
        matches!(self.status(), TaskStatus::Running)
    }

    /// Check if task is completed
    pub fn is_completed(&self) -> bool {
        matches!(self.status(), TaskStatus::Completed)
    }

    /// Check if task was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self.status(), TaskStatus::Cancelled)
    }

    /// Check if task failed
    pub fn is_failed(&self) -> bool {
        matches!(self.status(), TaskStatus::Failed)
    }

    /// Panic message of a failed task
    pub fn failure(&self) -> Option<String> {
        self.state.failure.borrow().clone()
    }

    /// Mark the task cancelled; its future is dropped at its next poll
    pub fn cancel(&self) {
        self.state.cancel();
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "Task({}, \"{}\")", self.id(), name)
        } else {
            write!(f, "Task({})", self.id())
        }
    }
}
