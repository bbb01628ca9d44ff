//! Shared helpers for harness integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use vigil_runtime::{Environment, Harness, MemorySink};

// Re-export testing utilities
pub use pretty_assertions::{assert_eq, assert_ne};

/// Harness on simulated time collecting reports in memory
pub fn virtual_harness() -> (Harness, MemorySink) {
    let env = Environment::virtual_time();
    let sink = MemorySink::new();
    let harness = Harness::with_options(&env, Rc::new(sink.clone()), Duration::from_secs(5));
    (harness, sink)
}

/// Shared, append-only log of labels
pub fn journal() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}

/// Spawn `future` on the harness loop and collect its output in a slot
pub fn spawn_collect<T: 'static>(
    harness: &Harness,
    future: impl Future<Output = T> + 'static,
) -> Rc<RefCell<Option<T>>> {
    let slot = Rc::new(RefCell::new(None));
    let out = Rc::clone(&slot);
    harness.event_loop().spawn_local(None, async move {
        *out.borrow_mut() = Some(future.await);
    });
    slot
}
