//! Shared fixtures for tripmesh-ingest integration tests

#![allow(dead_code)]

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tripmesh_common::config::IngestSettings;
use tripmesh_ingest::db;
use tripmesh_ingest::models::IngestionJob;
use tripmesh_ingest::services::ProgressTracker;
use uuid::Uuid;

pub const HEADER: &str = "region,origin_coord,destination_coord,datetime,datasource";

/// Temporary on-disk database; the directory lives as long as this value
pub struct TestDb {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let pool = db::init_database_pool(&dir.path().join("tripmesh.db"))
        .await
        .unwrap();
    TestDb { dir, pool }
}

fn no_wait_options(test_db: &TestDb) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(test_db.dir.path().join("tripmesh.db"))
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::ZERO)
}

/// Single-connection pool on the test database that fails at once on a
/// held write lock instead of waiting in SQLite
pub async fn no_wait_pool(test_db: &TestDb) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(no_wait_options(test_db))
        .await
        .unwrap()
}

/// Connection holding the database write lock until it commits
pub async fn hold_write_lock(test_db: &TestDb) -> SqliteConnection {
    let mut conn = SqliteConnection::connect_with(&no_wait_options(test_db))
        .await
        .unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await.unwrap();
    conn
}

/// Release a lock taken by `hold_write_lock` after `delay`
pub fn release_after(mut conn: SqliteConnection, delay: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        sqlx::query("COMMIT").execute(&mut conn).await.unwrap();
    })
}

pub fn settings_with_chunk(chunk_size: usize) -> IngestSettings {
    IngestSettings {
        chunk_size,
        ..Default::default()
    }
}

/// One CSV data row; coordinates are `(lat, lng)`
pub fn trip_row(region: &str, origin: (f64, f64), destination: (f64, f64), datetime: &str) -> String {
    format!(
        "{},POINT ({} {}),POINT ({} {}),{},cheap_mobile",
        region, origin.1, origin.0, destination.1, destination.0, datetime
    )
}

/// Write `rows` under a header into `dir/name`
pub fn write_csv(dir: &Path, name: &str, rows: &[String]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", HEADER).unwrap();
    for row in rows {
        writeln!(file, "{}", row).unwrap();
    }
    path
}

/// Three Prague trips sharing origin cell u2fkb, destination cell u2fm1
/// and the 09:00 hour
pub fn prague_rows() -> Vec<String> {
    vec![
        trip_row("Prague", (50.0755, 14.4378), (50.1000, 14.4800), "2018-05-28 09:03:40"),
        trip_row("Prague", (50.0760, 14.4381), (50.1003, 14.4805), "2018-05-28 09:15:00"),
        trip_row("Prague", (50.0752, 14.4370), (50.0998, 14.4797), "2018-05-28 09:44:10"),
    ]
}

/// Poll until the job reaches a terminal status
pub async fn wait_for_terminal(tracker: &ProgressTracker, job_id: Uuid) -> IngestionJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = tracker.get(job_id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not finish, last status {}",
            job_id,
            job.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn count_groups(pool: &SqlitePool) -> u64 {
    let mut conn = pool.acquire().await.unwrap();
    db::analytics::count_trip_groups(&mut conn).await.unwrap()
}

pub async fn count_trips(pool: &SqlitePool) -> u64 {
    let mut conn = pool.acquire().await.unwrap();
    db::trips::count_trips(&mut conn).await.unwrap()
}
