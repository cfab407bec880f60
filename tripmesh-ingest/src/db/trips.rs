//! Trip persistence

use sqlx::SqliteConnection;
use tripmesh_common::Result;

use super::format_timestamp;
use crate::models::ParsedTrip;

/// Insert a batch of trips on the caller's connection (normally the batch
/// transaction, so the batch lands or rolls back as one unit).
pub async fn insert_trips(conn: &mut SqliteConnection, trips: &[ParsedTrip]) -> Result<()> {
    for trip in trips {
        sqlx::query(
            r#"
            INSERT INTO trips (
                region, origin_lat, origin_lng, destination_lat, destination_lng,
                started_at, datasource, group_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trip.region)
        .bind(trip.origin_lat)
        .bind(trip.origin_lng)
        .bind(trip.destination_lat)
        .bind(trip.destination_lng)
        .bind(format_timestamp(trip.started_at))
        .bind(&trip.datasource)
        .bind(trip.group_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Total number of persisted trips
pub async fn count_trips(conn: &mut SqliteConnection) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trips")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as u64)
}

/// Number of trips assigned to one group
pub async fn count_trips_in_group(conn: &mut SqliteConnection, group_id: i64) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trips WHERE group_id = ?")
        .bind(group_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as u64)
}
