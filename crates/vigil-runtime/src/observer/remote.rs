//! Cross-thread notification delivery
//!
//! Host code running on other threads (a crash-reporting subprocess watcher,
//! a storage worker) cannot touch the loop directly. It publishes through a
//! [`RemotePublisher`], whose messages the registry drains at the start of
//! every loop quantum and dispatches like any local publication.

use crate::observer::Payload;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A notification sent from another thread
pub(crate) struct RemoteMessage {
    pub(crate) topic: String,
    pub(crate) payload: Payload,
}

/// Sending half for notifications published from other threads
///
/// Cheap to clone and `Send`; dropping every publisher does not affect the
/// registry.
#[derive(Clone)]
pub struct RemotePublisher {
    pub(crate) tx: mpsc::UnboundedSender<RemoteMessage>,
    pub(crate) external: Arc<AtomicUsize>,
}

impl RemotePublisher {
    /// Queue a notification for dispatch on the loop's thread
    ///
    /// Returns false if the registry has been closed.
    pub fn publish(&self, topic: impl Into<String>, payload: Payload) -> bool {
        self.tx
            .send(RemoteMessage {
                topic: topic.into(),
                payload,
            })
            .is_ok()
    }

    /// Check if the registry side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Announce that a notification will arrive from outside the loop
    ///
    /// While any [`ExternalWork`] is alive the loop will not fast-forward a
    /// virtual clock past the gap; it waits in real time instead.
    pub fn expect_delivery(&self) -> ExternalWork {
        self.external.fetch_add(1, Ordering::SeqCst);
        ExternalWork {
            publisher: self.clone(),
        }
    }
}

impl fmt::Debug for RemotePublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotePublisher")
            .field("is_closed", &self.is_closed())
            .field("outstanding", &self.external.load(Ordering::SeqCst))
            .finish()
    }
}

/// Outstanding promise of an external notification
///
/// Released when dropped or when [`ExternalWork::publish`] delivers.
pub struct ExternalWork {
    publisher: RemotePublisher,
}

impl ExternalWork {
    /// Deliver the promised notification and release the promise
    pub fn publish(self, topic: impl Into<String>, payload: Payload) -> bool {
        self.publisher.publish(topic, payload)
    }
}

impl Drop for ExternalWork {
    fn drop(&mut self) {
        self.publisher.external.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for ExternalWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalWork").finish()
    }
}
