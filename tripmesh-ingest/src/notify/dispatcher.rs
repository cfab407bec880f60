//! Progress publishing
//!
//! Producers push `(job_id, message)` pairs onto one unbounded queue; a
//! single dispatcher task drains it and fans out through the registry, so
//! messages for a job reach subscribers in publish order.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tripmesh_common::ProgressMessage;
use uuid::Uuid;

use super::registry::NotificationRegistry;

type Envelope = (Uuid, ProgressMessage);

/// Cloneable producer handle for progress messages
#[derive(Clone)]
pub struct ProgressPublisher {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ProgressPublisher {
    /// Publisher plus the queue it feeds, for callers running their own dispatch loop
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for `job_id`. Never blocks.
    pub fn publish(&self, job_id: Uuid, message: ProgressMessage) {
        if self.tx.send((job_id, message)).is_err() {
            warn!(job_id = %job_id, "Progress dispatcher stopped, message dropped");
        }
    }
}

/// Start the dispatcher task feeding `registry`.
///
/// The task ends once every publisher clone has been dropped.
pub fn spawn_dispatcher(registry: NotificationRegistry) -> (ProgressPublisher, JoinHandle<()>) {
    let (publisher, mut rx) = ProgressPublisher::channel();
    let handle = tokio::spawn(async move {
        while let Some((job_id, message)) = rx.recv().await {
            let delivered = registry.broadcast(job_id, &message);
            debug!(
                job_id = %job_id,
                status = message.status.as_str(),
                processed = message.processed_rows,
                delivered,
                "Progress dispatched"
            );
        }
        debug!("Progress dispatcher stopped");
    });
    (publisher, handle)
}
