//! Ingestion services

pub mod cluster_resolver;
pub mod ingestion;
pub mod progress_tracker;

pub use cluster_resolver::{resolve_group, GroupStore, InsertGroupError};
pub use ingestion::{IngestionService, IngestionSummary};
pub use progress_tracker::ProgressTracker;
