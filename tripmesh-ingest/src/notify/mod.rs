//! Job progress notifications
//!
//! `NotificationRegistry` tracks subscribers per job; `ProgressPublisher`
//! is the producer side used by the ingestion pipeline.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{spawn_dispatcher, ProgressPublisher};
pub use registry::{
    DeliveryError, NotificationRegistry, NotificationSink, Subscription, SubscriptionHandle,
    SubscriptionId,
};
