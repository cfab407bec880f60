//! Per-job subscriber registry
//!
//! Fan-out is best effort: delivery never blocks, and a subscriber whose
//! sink is closed or full is dropped from the registry on the spot. Late
//! subscribers see only messages broadcast after they joined.

use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use tripmesh_common::ProgressMessage;
use uuid::Uuid;

/// Per-registry subscriber sequence number
pub type SubscriptionId = u64;

/// Why a message could not be handed to a subscriber
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber disconnected")]
    Closed,
    #[error("subscriber buffer full")]
    Full,
}

/// Non-blocking destination for progress messages
pub trait NotificationSink: Send {
    fn try_deliver(&self, message: &ProgressMessage) -> Result<(), DeliveryError>;
}

impl NotificationSink for mpsc::Sender<ProgressMessage> {
    fn try_deliver(&self, message: &ProgressMessage) -> Result<(), DeliveryError> {
        self.try_send(message.clone()).map_err(|err| match err {
            TrySendError::Closed(_) => DeliveryError::Closed,
            TrySendError::Full(_) => DeliveryError::Full,
        })
    }
}

/// Identifies one registration, for explicit unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub job_id: Uuid,
    pub id: SubscriptionId,
}

type SinkList = Vec<(SubscriptionId, Box<dyn NotificationSink>)>;

#[derive(Default)]
struct RegistryInner {
    next_id: SubscriptionId,
    jobs: HashMap<Uuid, SinkList>,
}

impl RegistryInner {
    fn remove(&mut self, handle: SubscriptionHandle) -> bool {
        let Some(sinks) = self.jobs.get_mut(&handle.job_id) else {
            return false;
        };
        let before = sinks.len();
        sinks.retain(|(id, _)| *id != handle.id);
        let removed = sinks.len() != before;
        if sinks.is_empty() {
            self.jobs.remove(&handle.job_id);
        }
        removed
    }
}

fn lock(inner: &Mutex<RegistryInner>) -> MutexGuard<'_, RegistryInner> {
    // A panic while holding the lock cannot leave the map half-updated
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared registry of job subscribers. Cheap to clone.
#[derive(Clone)]
pub struct NotificationRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    capacity: usize,
}

impl NotificationRegistry {
    /// `capacity` is the per-subscriber buffer, in messages
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to progress of `job_id` through a bounded channel
    pub fn subscribe(&self, job_id: Uuid) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let handle = self.register_sink(job_id, Box::new(tx));
        Subscription {
            handle,
            receiver,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Register an arbitrary sink for `job_id`
    pub fn register_sink(&self, job_id: Uuid, sink: Box<dyn NotificationSink>) -> SubscriptionHandle {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.jobs.entry(job_id).or_default().push((id, sink));
        debug!(job_id = %job_id, subscription = id, "Subscriber registered");
        SubscriptionHandle { job_id, id }
    }

    /// Remove one registration. Returns false when it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        lock(&self.inner).remove(handle)
    }

    /// Deliver `message` to every subscriber of `job_id`.
    ///
    /// Returns the number of subscribers that accepted it. Subscribers
    /// that fail are unregistered.
    pub fn broadcast(&self, job_id: Uuid, message: &ProgressMessage) -> usize {
        let mut inner = lock(&self.inner);
        let Some(sinks) = inner.jobs.get_mut(&job_id) else {
            return 0;
        };

        let mut delivered = 0;
        sinks.retain(|(id, sink)| match sink.try_deliver(message) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(err) => {
                warn!(job_id = %job_id, subscription = id, error = %err, "Dropping subscriber");
                false
            }
        });
        if sinks.is_empty() {
            inner.jobs.remove(&job_id);
        }
        delivered
    }

    /// Number of live registrations for `job_id`
    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        lock(&self.inner).jobs.get(&job_id).map_or(0, Vec::len)
    }
}

/// Receiving end of a subscription. Unregisters itself when dropped.
pub struct Subscription {
    handle: SubscriptionHandle,
    receiver: mpsc::Receiver<ProgressMessage>,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Next message, or `None` once the registry dropped this subscriber
    pub async fn recv(&mut self) -> Option<ProgressMessage> {
        self.receiver.recv().await
    }

    /// Already queued message, if any
    pub fn try_recv(&mut self) -> Option<ProgressMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = ProgressMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            if lock(&inner).remove(self.handle) {
                debug!(
                    job_id = %self.handle.job_id,
                    subscription = self.handle.id,
                    "Subscriber released"
                );
            }
        }
    }
}
