//! Concurrent group resolution and overlapping jobs

mod helpers;

use chrono::NaiveDate;
use helpers::*;
use std::sync::Arc;
use tokio::task::JoinSet;
use tripmesh_common::config::IngestSettings;
use tripmesh_ingest::notify::{spawn_dispatcher, NotificationRegistry};
use tripmesh_ingest::services::{resolve_group, IngestionService};
use tripmesh_ingest::utils::{begin_unit, retry_on_lock};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolvers_agree_on_one_group() {
    let test_db = test_db().await;
    let settings = Arc::new(IngestSettings::default());
    let started_at = NaiveDate::from_ymd_opt(2018, 5, 28)
        .unwrap()
        .and_hms_opt(9, 3, 40)
        .unwrap();

    let mut join_set = JoinSet::new();
    for _ in 0..8 {
        let pool = test_db.pool.clone();
        let settings = Arc::clone(&settings);
        join_set.spawn(async move {
            retry_on_lock("test resolve", 10_000, || {
                let pool = pool.clone();
                let settings = Arc::clone(&settings);
                async move {
                    let mut unit = begin_unit(&pool, "test::resolve").await?;
                    let id = resolve_group(
                        unit.conn(),
                        &settings,
                        "Prague",
                        (50.0755, 14.4378),
                        (50.1000, 14.4800),
                        started_at,
                    )
                    .await?;
                    unit.commit().await?;
                    Ok(id)
                }
            })
            .await
        });
    }

    let mut ids = Vec::new();
    while let Some(result) = join_set.join_next().await {
        ids.push(result.unwrap().unwrap());
    }

    assert_eq!(ids.len(), 8);
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(count_groups(&test_db.pool).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_jobs_share_groups() {
    let test_db = test_db().await;
    let registry = NotificationRegistry::new(16);
    let (publisher, _dispatcher) = spawn_dispatcher(registry);
    let service = IngestionService::new(test_db.pool.clone(), settings_with_chunk(1), publisher);

    let mut join_set = JoinSet::new();
    for i in 0..3 {
        let csv = write_csv(test_db.dir.path(), &format!("prague_{}.csv", i), &prague_rows());
        let service = service.clone();
        join_set.spawn(async move { service.ingest_file(csv).await });
    }

    while let Some(result) = join_set.join_next().await {
        let summary = result.unwrap().unwrap();
        assert_eq!(summary.processed_rows, 3);
    }

    assert_eq!(count_groups(&test_db.pool).await, 1);
    assert_eq!(count_trips(&test_db.pool).await, 9);
}
