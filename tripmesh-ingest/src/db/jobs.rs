//! Ingestion job persistence
//!
//! Jobs are mutated only through `update_job`, which enforces the status
//! state machine and the monotonic `processed_rows` counter.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use tripmesh_common::JobStatus;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::models::{IngestionJob, JobUpdate};

/// Create a `pending` job for `filename`
pub async fn create_job(conn: &mut SqliteConnection, filename: &str) -> IngestResult<IngestionJob> {
    let now = tripmesh_common::time::now();
    let job = IngestionJob {
        id: Uuid::new_v4(),
        filename: filename.to_string(),
        status: JobStatus::Pending,
        total_rows: None,
        processed_rows: 0,
        message: None,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO ingestion_jobs (
            id, filename, status, total_rows, processed_rows, message,
            created_at, updated_at
        ) VALUES (?, ?, ?, NULL, 0, NULL, ?, ?)
        "#,
    )
    .bind(job.id.to_string())
    .bind(&job.filename)
    .bind(job.status.as_str())
    .bind(job.created_at.to_rfc3339())
    .bind(job.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(job)
}

/// Load a job by id
pub async fn get_job(conn: &mut SqliteConnection, job_id: Uuid) -> IngestResult<Option<IngestionJob>> {
    let row = sqlx::query(
        r#"
        SELECT id, filename, status, total_rows, processed_rows, message,
               created_at, updated_at
        FROM ingestion_jobs
        WHERE id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| job_from_row(&row)).transpose()
}

/// Apply a partial update and return the refreshed job.
///
/// Fails with `JobNotFound` for an unknown id and `InvalidTransition` when
/// the status change is not allowed. A job in a terminal status accepts no
/// update at all (`JobFinished` for counter-only updates), so a worker whose
/// job was failed underneath it stops at its next batch. `processed_rows`
/// may never decrease.
pub async fn update_job(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    update: &JobUpdate,
) -> IngestResult<IngestionJob> {
    let current = get_job(conn, job_id)
        .await?
        .ok_or(IngestError::JobNotFound(job_id))?;

    match update.status {
        Some(next) if !current.status.can_transition_to(next) => {
            return Err(IngestError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }
        None if current.status.is_terminal() => {
            return Err(IngestError::JobFinished {
                job_id,
                status: current.status,
            });
        }
        _ => {}
    }
    if let Some(processed) = update.processed_rows {
        if processed < current.processed_rows {
            return Err(IngestError::Persistence(tripmesh_common::Error::InvalidInput(
                format!(
                    "processed_rows cannot decrease ({} -> {}) for job {}",
                    current.processed_rows, processed, job_id
                ),
            )));
        }
    }

    sqlx::query(
        r#"
        UPDATE ingestion_jobs
        SET status = COALESCE(?, status),
            total_rows = COALESCE(?, total_rows),
            processed_rows = COALESCE(?, processed_rows),
            message = COALESCE(?, message),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(update.status.map(|s| s.as_str()))
    .bind(update.total_rows.map(to_db_count).transpose()?)
    .bind(update.processed_rows.map(to_db_count).transpose()?)
    .bind(update.message.as_deref())
    .bind(tripmesh_common::time::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(&mut *conn)
    .await?;

    get_job(conn, job_id)
        .await?
        .ok_or(IngestError::JobNotFound(job_id))
}

/// Jobs whose worker died with the process (e.g. restart mid-run).
///
/// Marks every non-terminal job as failed so none stays `running` forever.
/// Only the long-running service calls this at startup; any worker still
/// attached to such a job is refused by `update_job` from then on.
pub async fn fail_interrupted_jobs(conn: &mut SqliteConnection) -> IngestResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE ingestion_jobs
        SET status = 'failed',
            message = 'Ingestion interrupted by service restart',
            updated_at = ?
        WHERE status IN ('pending', 'running')
        "#,
    )
    .bind(tripmesh_common::time::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn to_db_count(value: u64) -> IngestResult<i64> {
    i64::try_from(value).map_err(|_| {
        IngestError::Persistence(tripmesh_common::Error::InvalidInput(format!(
            "Row count {} out of range",
            value
        )))
    })
}

fn from_db_count(value: i64) -> IngestResult<u64> {
    u64::try_from(value).map_err(|_| {
        IngestError::Persistence(tripmesh_common::Error::Internal(format!(
            "Negative row count {} in database",
            value
        )))
    })
}

fn parse_rfc3339(text: &str) -> IngestResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            IngestError::Persistence(tripmesh_common::Error::Internal(format!(
                "Failed to parse timestamp '{}': {}",
                text, e
            )))
        })
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> IngestResult<IngestionJob> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|e| {
        IngestError::Persistence(tripmesh_common::Error::Internal(format!(
            "Failed to parse job id: {}",
            e
        )))
    })?;
    let status: String = row.try_get("status")?;
    let total_rows: Option<i64> = row.try_get("total_rows")?;
    let processed_rows: i64 = row.try_get("processed_rows")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(IngestionJob {
        id,
        filename: row.try_get("filename")?,
        status: status.parse::<JobStatus>()?,
        total_rows: total_rows.map(from_db_count).transpose()?,
        processed_rows: from_db_count(processed_rows)?,
        message: row.try_get("message")?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}
