//! Chunked ingestion orchestrator
//!
//! A job reads its source file in chunks of `chunk_size` rows. Each chunk is
//! written in a single transaction together with the job's
//! `processed_rows` counter, so a crash or failure never leaves a partial
//! batch or a counter that disagrees with the stored trips.
//!
//! Job lifecycle: `pending` (scheduled) → `running` → `completed` | `failed`.

use chrono::NaiveDateTime;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tripmesh_common::config::IngestSettings;
use tripmesh_common::{JobStatus, ProgressMessage};
use uuid::Uuid;

use crate::clustering::{group_key, parse_datetime, parse_point};
use crate::db;
use crate::error::{IngestError, IngestResult};
use crate::models::{GroupId, GroupKey, IngestionJob, JobUpdate, ParsedTrip, RawRow};
use crate::notify::ProgressPublisher;
use crate::services::cluster_resolver::resolve_key;
use crate::services::progress_tracker::ProgressTracker;
use crate::source::{count_rows, CsvChunkReader};
use crate::utils::{begin_unit, retry_on_lock};

/// Result of a job that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSummary {
    pub job_id: Uuid,
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub batches: u64,
}

/// Row parsed and keyed, waiting for its group id
struct PendingTrip {
    key: GroupKey,
    region: String,
    origin: (f64, f64),
    destination: (f64, f64),
    started_at: NaiveDateTime,
    datasource: String,
}

/// Last committed state of a running job
#[derive(Debug, Default, Clone, Copy)]
struct JobProgress {
    processed_rows: u64,
    total_rows: Option<u64>,
}

#[derive(Clone)]
pub struct IngestionService {
    db: SqlitePool,
    settings: Arc<IngestSettings>,
    publisher: ProgressPublisher,
    tracker: ProgressTracker,
}

impl IngestionService {
    pub fn new(db: SqlitePool, settings: IngestSettings, publisher: ProgressPublisher) -> Self {
        Self {
            tracker: ProgressTracker::new(db.clone(), settings.max_lock_wait_ms),
            db,
            settings: Arc::new(settings),
            publisher,
        }
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Create a `pending` job for `path`, recorded under its file name
    pub async fn create_job(&self, path: &Path) -> IngestResult<IngestionJob> {
        self.tracker.create(&source_name(path)).await
    }

    /// Create a `pending` job for `path` and run it in the background.
    ///
    /// Returns as soon as the job row exists.
    pub async fn schedule_ingestion(&self, path: impl Into<PathBuf>) -> IngestResult<Uuid> {
        let path = path.into();
        let job = self.create_job(&path).await?;
        let job_id = job.id;

        info!(job_id = %job_id, path = %path.display(), "Ingestion job scheduled");

        let service = self.clone();
        tokio::spawn(async move {
            match service.run_job(job_id, path).await {
                Ok(summary) => info!(
                    job_id = %job_id,
                    processed = summary.processed_rows,
                    batches = summary.batches,
                    "Background ingestion task finished"
                ),
                Err(e) => error!(job_id = %job_id, error = %e, "Background ingestion task failed"),
            }
        });

        Ok(job_id)
    }

    /// Create a job for `path` and run it to completion on the current task
    pub async fn ingest_file(&self, path: impl Into<PathBuf>) -> IngestResult<IngestionSummary> {
        let path = path.into();
        let job = self.create_job(&path).await?;
        self.run_job(job.id, path).await
    }

    /// Run an existing `pending` job.
    ///
    /// On any failure the job is marked `failed` with the error text, a
    /// `failed` notification is published, and the error is returned.
    pub async fn run_job(&self, job_id: Uuid, path: PathBuf) -> IngestResult<IngestionSummary> {
        let mut progress = JobProgress::default();
        match self.execute(job_id, &path, &mut progress).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                self.fail_job(job_id, &err, progress).await;
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job_id: Uuid,
        path: &Path,
        progress: &mut JobProgress,
    ) -> IngestResult<IngestionSummary> {
        let total_rows = self.count_source_rows(job_id, path).await;
        progress.total_rows = total_rows;

        self.tracker
            .update(
                job_id,
                JobUpdate::status(JobStatus::Running)
                    .with_total(total_rows)
                    .with_processed(0),
            )
            .await?;
        info!(job_id = %job_id, total_rows = ?total_rows, "Ingestion job running");
        self.publisher
            .publish(job_id, ProgressMessage::new(JobStatus::Running, 0, total_rows));

        let chunk_size = self.settings.chunk_size.max(1);
        let source = path.to_path_buf();
        let mut reader = blocking(move || CsvChunkReader::open(&source)).await?;
        let mut batches = 0u64;

        loop {
            let (returned, rows) = blocking(move || {
                let rows = reader.next_chunk(chunk_size)?;
                Ok((reader, rows))
            })
            .await?;
            reader = returned;

            if rows.is_empty() {
                break;
            }

            let is_final = rows.len() < chunk_size;
            let processed_after = progress.processed_rows + rows.len() as u64;
            self.persist_batch(job_id, &rows, progress.processed_rows + 1, processed_after)
                .await?;

            progress.processed_rows = processed_after;
            batches += 1;
            self.publisher.publish(
                job_id,
                ProgressMessage::new(JobStatus::Running, processed_after, total_rows),
            );

            if is_final {
                break;
            }
        }

        self.tracker
            .update(
                job_id,
                JobUpdate::status(JobStatus::Completed).with_processed(progress.processed_rows),
            )
            .await?;
        info!(
            job_id = %job_id,
            processed = progress.processed_rows,
            batches,
            "Ingestion job completed"
        );
        self.publisher.publish(
            job_id,
            ProgressMessage::new(JobStatus::Completed, progress.processed_rows, total_rows),
        );

        Ok(IngestionSummary {
            job_id,
            processed_rows: progress.processed_rows,
            total_rows,
            batches,
        })
    }

    /// Best-effort row count; failure leaves the total unknown
    async fn count_source_rows(&self, job_id: Uuid, path: &Path) -> Option<u64> {
        let source = path.to_path_buf();
        match blocking(move || count_rows(&source)).await {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Could not count source rows, total unknown");
                None
            }
        }
    }

    /// Parse one chunk and write it atomically.
    ///
    /// `first_row` is the 1-based data row number of `rows[0]`, used in
    /// error messages.
    async fn persist_batch(
        &self,
        job_id: Uuid,
        rows: &[RawRow],
        first_row: u64,
        processed_after: u64,
    ) -> IngestResult<()> {
        let pending = rows
            .iter()
            .enumerate()
            .map(|(offset, row)| self.prepare_row(row, first_row + offset as u64))
            .collect::<IngestResult<Vec<_>>>()?;

        retry_on_lock("ingestion batch", self.settings.max_lock_wait_ms, || {
            self.write_batch(job_id, &pending, processed_after)
        })
        .await
    }

    fn prepare_row(&self, row: &RawRow, row_number: u64) -> IngestResult<PendingTrip> {
        let at_row = |err: IngestError| match err {
            IngestError::Parse(msg) => IngestError::Parse(format!("row {}: {}", row_number, msg)),
            other => other,
        };

        let origin = parse_point(&row.origin_coord).map_err(at_row)?;
        let destination = parse_point(&row.destination_coord).map_err(at_row)?;
        let started_at = parse_datetime(&row.datetime).map_err(at_row)?;

        Ok(PendingTrip {
            key: group_key(&self.settings, &row.region, origin, destination, started_at),
            region: row.region.clone(),
            origin,
            destination,
            started_at,
            datasource: row.datasource.clone(),
        })
    }

    /// One transaction: resolve groups, insert trips, advance the job counter
    async fn write_batch(
        &self,
        job_id: Uuid,
        pending: &[PendingTrip],
        processed_after: u64,
    ) -> IngestResult<()> {
        let mut unit = begin_unit(&self.db, "ingestion::write_batch").await?;
        let mut groups: HashMap<&GroupKey, GroupId> = HashMap::new();
        let mut trips = Vec::with_capacity(pending.len());

        for trip in pending {
            let group_id = match groups.get(&trip.key) {
                Some(id) => *id,
                None => {
                    let id = resolve_key(unit.conn(), &self.settings, &trip.key).await?;
                    groups.insert(&trip.key, id);
                    id
                }
            };
            trips.push(ParsedTrip {
                region: trip.region.clone(),
                origin_lat: trip.origin.0,
                origin_lng: trip.origin.1,
                destination_lat: trip.destination.0,
                destination_lng: trip.destination.1,
                started_at: trip.started_at,
                datasource: trip.datasource.clone(),
                group_id,
            });
        }

        db::trips::insert_trips(unit.conn(), &trips).await?;
        db::jobs::update_job(
            unit.conn(),
            job_id,
            &JobUpdate::default().with_processed(processed_after),
        )
        .await?;
        unit.commit().await?;

        debug!(
            job_id = %job_id,
            batch_rows = trips.len(),
            groups = groups.len(),
            processed = processed_after,
            "Batch committed"
        );
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, err: &IngestError, progress: JobProgress) {
        let message = err.to_string();
        error!(
            job_id = %job_id,
            processed = progress.processed_rows,
            error = %message,
            "Ingestion job failed"
        );

        let update = JobUpdate::status(JobStatus::Failed).with_message(message.clone());
        let (processed_rows, total_rows) = match self.tracker.update(job_id, update).await {
            Ok(job) => (job.processed_rows, job.total_rows),
            Err(IngestError::InvalidTransition { from, .. }) if from.is_terminal() => {
                warn!(job_id = %job_id, status = %from, "Job already finished, status left as is");
                (progress.processed_rows, progress.total_rows)
            }
            Err(update_err) => {
                error!(
                    job_id = %job_id,
                    error = %update_err,
                    "Could not record job failure"
                );
                (progress.processed_rows, progress.total_rows)
            }
        };

        self.publisher.publish(
            job_id,
            ProgressMessage::failed(processed_rows, total_rows, message),
        );
    }
}

/// Display name stored on the job record
fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn blocking<T, F>(task: F) -> IngestResult<T>
where
    F: FnOnce() -> IngestResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| IngestError::Worker(format!("Blocking read task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_name_uses_file_name() {
        assert_eq!(source_name(Path::new("/data/in/trips.csv")), "trips.csv");
        assert_eq!(source_name(Path::new("trips.csv")), "trips.csv");
        assert_eq!(source_name(Path::new("/")), "/");
    }
}
