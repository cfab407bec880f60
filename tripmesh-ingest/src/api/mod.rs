//! HTTP API handlers for tripmesh-ingest

pub mod analytics;
pub mod health;
pub mod ingest;
pub mod jobs;

pub use analytics::analytics_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
pub use jobs::job_routes;
