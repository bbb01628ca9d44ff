//! Topic-based observer registry
//!
//! Callbacks subscribe to a topic and are invoked, in subscription order,
//! for every notification on that topic. Notifications published through
//! the registry are dispatched by the event loop, one dispatch per quantum.
//!
//! Subscribing or unsubscribing while a dispatch is running never mutates
//! the list being walked: the change is queued and applied once the
//! outermost dispatch returns. An observer that is unsubscribed mid-dispatch
//! is still skipped for the rest of that dispatch.

pub mod remote;

pub use remote::{ExternalWork, RemotePublisher};

use crate::error::{HarnessError, HarnessResult};
use crate::event_loop::{EventLoop, HookId, TimerId};
use remote::RemoteMessage;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Data carried by a notification
pub type Payload = serde_json::Value;

/// Handle identifying one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

type ObserverFn = Rc<dyn Fn(&str, &Payload)>;

struct Subscriber {
    id: SubscriptionId,
    topic: String,
    callback: ObserverFn,
}

enum Deferred {
    Add(Subscriber),
    Remove(SubscriptionId),
}

struct RegistryInner {
    event_loop: EventLoop,
    subscribers: RefCell<Vec<Subscriber>>,
    live: RefCell<HashSet<SubscriptionId>>,
    deferred: RefCell<Vec<Deferred>>,
    dispatch_depth: Cell<usize>,
    next_id: Cell<u64>,
    remote_tx: mpsc::UnboundedSender<RemoteMessage>,
    remote_rx: RefCell<mpsc::UnboundedReceiver<RemoteMessage>>,
    external: Arc<AtomicUsize>,
    hook: Cell<Option<HookId>>,
}

/// Registry of topic subscriptions, bound to one event loop
///
/// Cloning the handle shares the same registry.
#[derive(Clone)]
pub struct ObserverRegistry {
    inner: Rc<RegistryInner>,
}

/// Applies deferred changes when the outermost dispatch unwinds
struct DispatchGuard<'a> {
    registry: &'a ObserverRegistry,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let depth = self.registry.inner.dispatch_depth.get() - 1;
        self.registry.inner.dispatch_depth.set(depth);
        if depth == 0 {
            self.registry.apply_deferred();
        }
    }
}

impl ObserverRegistry {
    /// Create a registry dispatching on `event_loop`
    pub fn new(event_loop: &EventLoop) -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let registry = Self {
            inner: Rc::new(RegistryInner {
                event_loop: event_loop.clone(),
                subscribers: RefCell::new(Vec::new()),
                live: RefCell::new(HashSet::new()),
                deferred: RefCell::new(Vec::new()),
                dispatch_depth: Cell::new(0),
                next_id: Cell::new(1),
                remote_tx,
                remote_rx: RefCell::new(remote_rx),
                external: Arc::new(AtomicUsize::new(0)),
                hook: Cell::new(None),
            }),
        };

        let weak = Rc::downgrade(&registry.inner);
        let hook = event_loop.add_poll_hook(move || match Self::from_weak(&weak) {
            Some(registry) => registry.drain_remote(),
            None => false,
        });
        registry.inner.hook.set(Some(hook));
        registry
    }

    fn from_weak(weak: &Weak<RegistryInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// The loop this registry dispatches on
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// Register `callback` for notifications on `topic`
    pub fn subscribe(
        &self,
        topic: &str,
        callback: impl Fn(&str, &Payload) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let subscriber = Subscriber {
            id,
            topic: topic.to_string(),
            callback: Rc::new(callback),
        };
        self.inner.live.borrow_mut().insert(id);
        if self.is_dispatching() {
            self.inner
                .deferred
                .borrow_mut()
                .push(Deferred::Add(subscriber));
        } else {
            self.inner.subscribers.borrow_mut().push(subscriber);
        }
        tracing::debug!(%id, topic, "subscribed");
        id
    }

    /// Remove a subscription
    ///
    /// Releasing the same handle twice is reported as
    /// [`HarnessError::ObserverAlreadyUnsubscribed`].
    pub fn unsubscribe(&self, id: SubscriptionId) -> HarnessResult<()> {
        if !self.inner.live.borrow_mut().remove(&id) {
            return Err(HarnessError::ObserverAlreadyUnsubscribed(id));
        }
        if self.is_dispatching() {
            self.inner.deferred.borrow_mut().push(Deferred::Remove(id));
        } else {
            let removed: Vec<Subscriber> = {
                let mut subscribers = self.inner.subscribers.borrow_mut();
                let (removed, kept) = subscribers.drain(..).partition(|s| s.id == id);
                *subscribers = kept;
                removed
            };
            drop(removed);
        }
        tracing::debug!(%id, "unsubscribed");
        Ok(())
    }

    /// Whether `id` is still subscribed
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.live.borrow().contains(&id)
    }

    /// Number of live subscriptions on `topic`, including deferred ones
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let live = self.inner.live.borrow();
        let active = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.topic == topic && live.contains(&s.id))
            .count();
        let deferred = self
            .inner
            .deferred
            .borrow()
            .iter()
            .filter(|d| matches!(d, Deferred::Add(s) if s.topic == topic && live.contains(&s.id)))
            .count();
        active + deferred
    }

    /// Whether a dispatch is currently running
    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatch_depth.get() > 0
    }

    /// Queue a notification; it is dispatched on a later loop quantum
    pub fn publish(&self, topic: &str, payload: Payload) {
        let weak = Rc::downgrade(&self.inner);
        let topic = topic.to_string();
        self.inner.event_loop.post_callback(move || {
            if let Some(registry) = Self::from_weak(&weak) {
                registry.notify(&topic, &payload);
            }
        });
    }

    /// Queue a notification to be dispatched once `delay` has elapsed
    pub fn publish_after(&self, delay: Duration, topic: &str, payload: Payload) -> TimerId {
        let weak = Rc::downgrade(&self.inner);
        let topic = topic.to_string();
        self.inner.event_loop.set_timeout(delay, move || {
            if let Some(registry) = Self::from_weak(&weak) {
                registry.notify(&topic, &payload);
            }
        })
    }

    /// Dispatch a notification synchronously to every live subscriber
    ///
    /// Returns how many observers were invoked.
    pub fn notify(&self, topic: &str, payload: &Payload) -> usize {
        let snapshot: Vec<(SubscriptionId, ObserverFn)> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| (s.id, Rc::clone(&s.callback)))
            .collect();

        self.inner
            .dispatch_depth
            .set(self.inner.dispatch_depth.get() + 1);
        let _guard = DispatchGuard { registry: self };

        let mut delivered = 0;
        for (id, callback) in snapshot {
            let live = self.inner.live.borrow().contains(&id);
            if !live {
                continue;
            }
            callback(topic, payload);
            delivered += 1;
        }
        tracing::debug!(topic, delivered, "notification dispatched");
        delivered
    }

    /// Publisher usable from other threads
    pub fn remote(&self) -> RemotePublisher {
        RemotePublisher {
            tx: self.inner.remote_tx.clone(),
            external: Arc::clone(&self.inner.external),
        }
    }

    /// Move cross-thread notifications onto the loop
    ///
    /// Returns whether more external input is still expected.
    fn drain_remote(&self) -> bool {
        // Read the count before draining: a sender publishes before releasing
        // its promise, so a zero here means its message is already queued.
        let expecting = self.inner.external.load(Ordering::SeqCst) > 0;
        loop {
            let next = self.inner.remote_rx.borrow_mut().try_recv();
            match next {
                Ok(message) => self.publish(&message.topic, message.payload),
                Err(_) => break,
            }
        }
        expecting
    }

    fn apply_deferred(&self) {
        let pending = std::mem::take(&mut *self.inner.deferred.borrow_mut());
        let mut removed = Vec::new();
        for change in pending {
            match change {
                Deferred::Add(subscriber) => {
                    let live = self.inner.live.borrow().contains(&subscriber.id);
                    if live {
                        self.inner.subscribers.borrow_mut().push(subscriber);
                    } else {
                        removed.push(subscriber);
                    }
                }
                Deferred::Remove(id) => {
                    let mut subscribers = self.inner.subscribers.borrow_mut();
                    if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
                        removed.push(subscribers.remove(pos));
                    }
                }
            }
        }
        drop(removed);
    }

    /// Drop every subscription and detach from the loop
    pub fn close(&self) {
        if let Some(hook) = self.inner.hook.take() {
            self.inner.event_loop.remove_poll_hook(hook);
        }
        self.inner.live.borrow_mut().clear();
        let subscribers = std::mem::take(&mut *self.inner.subscribers.borrow_mut());
        let deferred = std::mem::take(&mut *self.inner.deferred.borrow_mut());
        drop(subscribers);
        drop(deferred);
        self.inner.remote_rx.borrow_mut().close();
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("subscriptions", &self.inner.live.borrow().len())
            .field("dispatching", &self.is_dispatching())
            .finish()
    }
}
