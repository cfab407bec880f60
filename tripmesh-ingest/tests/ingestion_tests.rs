//! End-to-end ingestion pipeline tests

mod helpers;

use helpers::*;
use std::time::Duration;
use tripmesh_common::{JobStatus, ProgressMessage};
use tripmesh_ingest::db;
use tripmesh_ingest::notify::{spawn_dispatcher, NotificationRegistry, ProgressPublisher};
use tripmesh_ingest::services::IngestionService;
use tripmesh_ingest::IngestError;

fn service(test_db: &TestDb, chunk_size: usize) -> (IngestionService, NotificationRegistry) {
    let registry = NotificationRegistry::new(64);
    let (publisher, _dispatcher) = spawn_dispatcher(registry.clone());
    let service = IngestionService::new(test_db.pool.clone(), settings_with_chunk(chunk_size), publisher);
    (service, registry)
}

/// Collect messages until (and including) the first terminal one
async fn collect_until_terminal(
    subscription: &mut tripmesh_ingest::notify::Subscription,
) -> Vec<ProgressMessage> {
    let mut seen = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for progress")
            .expect("subscription closed early");
        let terminal = message.status.is_terminal();
        seen.push(message);
        if terminal {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_prague_trips_form_one_group() {
    let test_db = test_db().await;
    let csv = write_csv(test_db.dir.path(), "prague.csv", &prague_rows());
    let (service, _registry) = service(&test_db, 1000);

    let summary = service.ingest_file(&csv).await.unwrap();

    assert_eq!(summary.processed_rows, 3);
    assert_eq!(summary.total_rows, Some(3));
    assert_eq!(summary.batches, 1);
    assert_eq!(count_groups(&test_db.pool).await, 1);
    assert_eq!(count_trips(&test_db.pool).await, 3);

    let job = service.tracker().get(summary.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_rows, 3);
    assert_eq!(job.filename, "prague.csv");

    let mut conn = test_db.pool.acquire().await.unwrap();
    let groups = db::analytics::list_trip_groups(&mut conn, 10).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].trip_count, 3);
    assert_eq!(groups[0].group.region, "Prague");
    assert_eq!(groups[0].group.origin_geohash, "u2fkb");
    assert_eq!(groups[0].group.destination_geohash, "u2fm1");
    assert_eq!(groups[0].group.time_bucket_minutes, 60);
    assert_eq!(
        groups[0].group.time_bucket_start.format("%Y-%m-%d %H:%M:%S").to_string(),
        "2018-05-28 09:00:00"
    );

    let group_id = groups[0].group.id;
    let stored = db::groups::get_group(&mut conn, group_id).await.unwrap();
    assert_eq!(stored.as_ref(), Some(&groups[0].group));
    assert_eq!(db::trips::count_trips_in_group(&mut conn, group_id).await.unwrap(), 3);
    assert!(db::groups::get_group(&mut conn, group_id + 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_chunks_commit_in_batches_with_final_partial() {
    let test_db = test_db().await;
    let rows: Vec<String> = (0..5)
        .map(|i| {
            trip_row(
                "Turin",
                (45.07 + i as f64 * 0.1, 7.68),
                (45.0, 7.6),
                &format!("2018-05-2{} 10:00:00", i),
            )
        })
        .collect();
    let csv = write_csv(test_db.dir.path(), "turin.csv", &rows);
    let (service, _registry) = service(&test_db, 2);

    let summary = service.ingest_file(&csv).await.unwrap();

    assert_eq!(summary.batches, 3);
    assert_eq!(summary.processed_rows, 5);
    assert_eq!(count_trips(&test_db.pool).await, 5);
}

#[tokio::test]
async fn test_malformed_row_fails_job_keeping_committed_batches() {
    let test_db = test_db().await;
    let mut rows = prague_rows();
    rows.push("Prague,POINT (abc 50.07),POINT (14.48 50.10),2018-05-28 09:50:00,cheap_mobile".to_string());
    rows.push(trip_row("Prague", (50.0755, 14.4378), (50.1, 14.48), "2018-05-28 09:55:00"));
    let csv = write_csv(test_db.dir.path(), "broken.csv", &rows);
    let (service, registry) = service(&test_db, 2);

    let job = service.tracker().create("broken.csv").await.unwrap();
    let mut subscription = registry.subscribe(job.id);
    let err = service.run_job(job.id, csv).await.unwrap_err();

    assert!(matches!(err, IngestError::Parse(_)));
    assert!(err.to_string().contains("row 4"));

    let job = service.tracker().get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.processed_rows, 2);
    assert!(job.message.as_deref().is_some_and(|m| !m.is_empty()));
    assert_eq!(count_trips(&test_db.pool).await, 2);

    let messages = collect_until_terminal(&mut subscription).await;
    let last = messages.last().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(last.processed_rows, 2);
    assert!(last.message.as_deref().is_some_and(|m| m.contains("row 4")));
}

#[tokio::test]
async fn test_notifications_arrive_in_order() {
    let test_db = test_db().await;
    let csv = write_csv(test_db.dir.path(), "prague.csv", &prague_rows());
    let (service, registry) = service(&test_db, 2);

    let job = service.tracker().create("prague.csv").await.unwrap();
    let mut subscription = registry.subscribe(job.id);
    service.run_job(job.id, csv).await.unwrap();

    let seen: Vec<(JobStatus, u64)> = collect_until_terminal(&mut subscription)
        .await
        .into_iter()
        .map(|m| (m.status, m.processed_rows))
        .collect();
    assert_eq!(
        seen,
        vec![
            (JobStatus::Running, 0),
            (JobStatus::Running, 2),
            (JobStatus::Running, 3),
            (JobStatus::Completed, 3),
        ]
    );
}

#[tokio::test]
async fn test_undecodable_csv_fails_job() {
    let test_db = test_db().await;
    let mut rows = prague_rows();
    rows.push("Prague,POINT (14.4 50.0),2018-05-28 09:00:00".to_string());
    let csv = write_csv(test_db.dir.path(), "short_row.csv", &rows);
    let (service, _registry) = service(&test_db, 10);

    let job = service.tracker().create("short_row.csv").await.unwrap();
    let err = service.run_job(job.id, csv).await.unwrap_err();

    assert!(matches!(err, IngestError::Csv(_)));
    let job = service.tracker().get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.total_rows, None);
    assert_eq!(job.processed_rows, 0);
    assert_eq!(count_trips(&test_db.pool).await, 0);
}

#[tokio::test]
async fn test_missing_source_file_fails_job() {
    let test_db = test_db().await;
    let missing = test_db.dir.path().join("missing.csv");
    let (service, _registry) = service(&test_db, 10);

    let job = service.tracker().create("missing.csv").await.unwrap();
    assert!(service.run_job(job.id, missing).await.is_err());

    let job = service.tracker().get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.message.is_some());
}

#[tokio::test]
async fn test_reingesting_reuses_existing_groups() {
    let test_db = test_db().await;
    let csv = write_csv(test_db.dir.path(), "prague.csv", &prague_rows());
    let (service, _registry) = service(&test_db, 1000);

    service.ingest_file(&csv).await.unwrap();
    service.ingest_file(&csv).await.unwrap();

    assert_eq!(count_groups(&test_db.pool).await, 1);
    assert_eq!(count_trips(&test_db.pool).await, 6);
}

#[tokio::test]
async fn test_scheduled_job_runs_in_background() {
    let test_db = test_db().await;
    let csv = write_csv(test_db.dir.path(), "prague.csv", &prague_rows());
    let (service, _registry) = service(&test_db, 1000);

    let job_id = service.schedule_ingestion(&csv).await.unwrap();
    let job = wait_for_terminal(service.tracker(), job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_rows, 3);
    assert_eq!(job.total_rows, Some(3));
}

#[tokio::test]
async fn test_publisher_without_dispatcher_does_not_block_ingestion() {
    let test_db = test_db().await;
    let csv = write_csv(test_db.dir.path(), "prague.csv", &prague_rows());
    let (publisher, receiver) = ProgressPublisher::channel();
    drop(receiver);
    let service = IngestionService::new(test_db.pool.clone(), settings_with_chunk(1), publisher);

    let summary = service.ingest_file(&csv).await.unwrap();

    assert_eq!(summary.batches, 3);
    assert_eq!(count_trips(&test_db.pool).await, 3);
}

#[tokio::test]
async fn test_job_records_bare_file_name() {
    let test_db = test_db().await;
    let csv = write_csv(test_db.dir.path(), "prague.csv", &prague_rows());
    let (service, _registry) = service(&test_db, 1000);

    let job = service.create_job(&csv).await.unwrap();
    assert_eq!(job.filename, "prague.csv");
    assert_eq!(job.status, JobStatus::Pending);

    service.run_job(job.id, csv).await.unwrap();
    assert_eq!(service.tracker().get(job.id).await.unwrap().filename, "prague.csv");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_stops_once_job_failed_elsewhere() {
    let test_db = test_db().await;
    let rows: Vec<String> = (0..20_000)
        .map(|i| {
            trip_row(
                "Hamburg",
                (53.55 + (i % 50) as f64 * 0.01, 9.99),
                (53.60, 10.05),
                "2018-05-01 08:00:00",
            )
        })
        .collect();
    let csv = write_csv(test_db.dir.path(), "large.csv", &rows);
    let (service, _registry) = service(&test_db, 10);

    let job = service.create_job(&csv).await.unwrap();
    let worker = {
        let service = service.clone();
        tokio::spawn(async move { service.run_job(job.id, csv).await })
    };

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let current = service.tracker().get(job.id).await.unwrap();
        assert!(!current.status.is_terminal(), "job finished before it was interrupted");
        if current.processed_rows > 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never committed a batch");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let marked = {
        let mut conn = test_db.pool.acquire().await.unwrap();
        db::jobs::fail_interrupted_jobs(&mut conn).await.unwrap()
    };
    assert_eq!(marked, 1);

    let err = worker.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        IngestError::JobFinished {
            status: JobStatus::Failed,
            ..
        }
    ));

    let job = service.tracker().get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.message.as_deref(),
        Some("Ingestion interrupted by service restart")
    );
    assert!(job.processed_rows < 20_000);
    assert_eq!(job.processed_rows, count_trips(&test_db.pool).await);
}

#[tokio::test]
async fn test_job_completes_through_lock_contention() {
    let test_db = test_db().await;
    let csv = write_csv(test_db.dir.path(), "prague.csv", &prague_rows());
    let registry = NotificationRegistry::new(16);
    let (publisher, _dispatcher) = spawn_dispatcher(registry);
    let service = IngestionService::new(no_wait_pool(&test_db).await, settings_with_chunk(2), publisher);
    let job = service.create_job(&csv).await.unwrap();

    let lock = hold_write_lock(&test_db).await;
    let release = release_after(lock, Duration::from_millis(200));

    let summary = service.run_job(job.id, csv).await.unwrap();
    release.await.unwrap();

    assert_eq!(summary.processed_rows, 3);
    let job = service.tracker().get(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_rows, 3);
    assert_eq!(count_trips(&test_db.pool).await, 3);
}
