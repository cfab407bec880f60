//! Database access for tripmesh-ingest
//!
//! SQLite through sqlx. Schema is created idempotently at startup.

pub mod analytics;
pub mod groups;
pub mod jobs;
pub mod trips;

use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tripmesh_common::Result;

/// Canonical text form of naive timestamps in the database.
/// Fixed width so lexical order equals chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(crate) fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map_err(|e| {
        tripmesh_common::Error::Internal(format!("Failed to parse timestamp '{}': {}", text, e))
    })
}

/// Initialize database connection pool
///
/// Creates the file and parent directory when missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    // Per-connection pragmas: WAL lets readers proceed while one ingestion
    // batch writes; busy_timeout makes writers queue on the lock
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create tables and indexes if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trip_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            origin_geohash TEXT NOT NULL,
            destination_geohash TEXT NOT NULL,
            time_bucket_start TEXT NOT NULL,
            time_bucket_minutes INTEGER NOT NULL,
            CONSTRAINT uq_trip_group UNIQUE (
                region, origin_geohash, destination_geohash, time_bucket_start
            )
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trips (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            origin_lat REAL NOT NULL,
            origin_lng REAL NOT NULL,
            destination_lat REAL NOT NULL,
            destination_lng REAL NOT NULL,
            started_at TEXT NOT NULL,
            datasource TEXT NOT NULL,
            group_id INTEGER NOT NULL REFERENCES trip_groups(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_trips_region ON trips(region)",
        "CREATE INDEX IF NOT EXISTS idx_trips_started_at ON trips(started_at)",
        "CREATE INDEX IF NOT EXISTS idx_trips_group_id ON trips(group_id)",
        "CREATE INDEX IF NOT EXISTS idx_trips_origin ON trips(origin_lat, origin_lng)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_jobs (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            total_rows INTEGER,
            processed_rows INTEGER NOT NULL DEFAULT 0,
            message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ingestion_jobs_status ON ingestion_jobs(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (trip_groups, trips, ingestion_jobs)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_timestamp_text_round_trip_and_order() {
        let a = NaiveDate::from_ymd_opt(2018, 5, 28)
            .unwrap()
            .and_hms_opt(9, 3, 40)
            .unwrap();
        let b = NaiveDate::from_ymd_opt(2018, 5, 28)
            .unwrap()
            .and_hms_micro_opt(9, 3, 40, 500)
            .unwrap();

        assert_eq!(format_timestamp(a), "2018-05-28 09:03:40.000000");
        assert_eq!(parse_timestamp(&format_timestamp(b)).unwrap(), b);
        assert!(format_timestamp(a) < format_timestamp(b));
    }
}
