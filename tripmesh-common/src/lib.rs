//! # tripmesh Common Library
//!
//! Shared code for the tripmesh services including:
//! - Error types
//! - Configuration loading and resolution
//! - Job status and progress event types
//! - Geohash encoding and time bucketing used for trip clustering
//! - SSE helpers

pub mod config;
pub mod error;
pub mod events;
pub mod geo;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use events::{JobStatus, ProgressMessage};
