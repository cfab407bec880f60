//! Job progress tracking
//!
//! Pool-backed facade over `db::jobs`, used for job updates made outside a
//! batch transaction (start, completion, failure). Writes are retried on
//! SQLite lock contention for up to `max_lock_wait_ms`, the same budget a
//! batch gets, so a busy database cannot strand a job in `running`.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::error::{IngestError, IngestResult};
use crate::models::{IngestionJob, JobUpdate};
use crate::utils::retry_on_lock;

#[derive(Clone)]
pub struct ProgressTracker {
    db: SqlitePool,
    max_lock_wait_ms: u64,
}

impl ProgressTracker {
    pub fn new(db: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            db,
            max_lock_wait_ms,
        }
    }

    /// Create a `pending` job for `filename`
    pub async fn create(&self, filename: &str) -> IngestResult<IngestionJob> {
        let pool = &self.db;
        retry_on_lock("create job", self.max_lock_wait_ms, move || async move {
            let mut conn = pool.acquire().await?;
            db::jobs::create_job(&mut conn, filename).await
        })
        .await
    }

    /// Apply `update` and return the refreshed job
    pub async fn update(&self, job_id: Uuid, update: JobUpdate) -> IngestResult<IngestionJob> {
        let pool = &self.db;
        let update = &update;
        retry_on_lock("update job", self.max_lock_wait_ms, move || async move {
            let mut conn = pool.acquire().await?;
            db::jobs::update_job(&mut conn, job_id, update).await
        })
        .await
    }

    /// Current job record; `JobNotFound` for an unknown id
    pub async fn get(&self, job_id: Uuid) -> IngestResult<IngestionJob> {
        let mut conn = self.db.acquire().await?;
        db::jobs::get_job(&mut conn, job_id)
            .await?
            .ok_or(IngestError::JobNotFound(job_id))
    }
}
