//! tripmesh-ingest library interface
//!
//! Batch ingestion of trip CSV files into SQLite, grouping trips with
//! similar origin, destination and time of day, plus the HTTP surface
//! for scheduling jobs and following their progress.

pub mod api;
pub mod clustering;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod services;
pub mod source;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, IngestError, IngestResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tripmesh_common::config::IngestSettings;

use crate::notify::{spawn_dispatcher, NotificationRegistry};
use crate::services::IngestionService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub ingestion: IngestionService,
    pub registry: NotificationRegistry,
    /// Uploaded CSV files land here before ingestion
    pub upload_dir: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        ingestion: IngestionService,
        registry: NotificationRegistry,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            ingestion,
            registry,
            upload_dir,
            startup_time: Utc::now(),
        }
    }

    /// Wire registry, dispatcher task and ingestion service together.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        db: SqlitePool,
        settings: IngestSettings,
        event_capacity: usize,
        upload_dir: PathBuf,
    ) -> Self {
        let registry = NotificationRegistry::new(event_capacity);
        let (publisher, _dispatcher) = spawn_dispatcher(registry.clone());
        let ingestion = IngestionService::new(db.clone(), settings, publisher);
        Self::new(db, ingestion, registry, upload_dir)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ingest_routes())
        .merge(api::job_routes())
        .merge(api::analytics_routes())
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
