//! Trip group persistence
//!
//! The `(region, origin_geohash, destination_geohash, time_bucket_start)`
//! uniqueness constraint is the last line of defence against duplicate
//! groups; `insert_group` reports a violation as `InsertGroupError::Conflict`.

use sqlx::{Row, SqliteConnection};
use tripmesh_common::Result;

use super::{format_timestamp, parse_timestamp};
use crate::models::{GroupId, GroupKey, TripGroup};
use crate::services::cluster_resolver::{GroupStore, InsertGroupError};

/// Look up a group by identity key
pub async fn find_group(conn: &mut SqliteConnection, key: &GroupKey) -> Result<Option<GroupId>> {
    let id: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM trip_groups
        WHERE region = ? AND origin_geohash = ? AND destination_geohash = ?
          AND time_bucket_start = ?
        "#,
    )
    .bind(&key.region)
    .bind(&key.origin_geohash)
    .bind(&key.destination_geohash)
    .bind(format_timestamp(key.time_bucket_start))
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

/// Insert a new group, classifying uniqueness violations as conflicts
pub async fn insert_group(
    conn: &mut SqliteConnection,
    key: &GroupKey,
    bucket_minutes: u32,
) -> std::result::Result<GroupId, InsertGroupError> {
    let result = sqlx::query(
        r#"
        INSERT INTO trip_groups (
            region, origin_geohash, destination_geohash,
            time_bucket_start, time_bucket_minutes
        ) VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&key.region)
    .bind(&key.origin_geohash)
    .bind(&key.destination_geohash)
    .bind(format_timestamp(key.time_bucket_start))
    .bind(i64::from(bucket_minutes))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(done) => Ok(done.last_insert_rowid()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(InsertGroupError::Conflict)
        }
        Err(e) => Err(InsertGroupError::Store(tripmesh_common::Error::Database(e))),
    }
}

/// Load a full group record by id
pub async fn get_group(conn: &mut SqliteConnection, id: GroupId) -> Result<Option<TripGroup>> {
    let row = sqlx::query(
        r#"
        SELECT id, region, origin_geohash, destination_geohash,
               time_bucket_start, time_bucket_minutes
        FROM trip_groups
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| group_from_row(&row)).transpose()
}

pub(crate) fn group_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TripGroup> {
    let bucket_start: String = row.try_get("time_bucket_start")?;
    let bucket_minutes: i64 = row.try_get("time_bucket_minutes")?;
    Ok(TripGroup {
        id: row.try_get("id")?,
        region: row.try_get("region")?,
        origin_geohash: row.try_get("origin_geohash")?,
        destination_geohash: row.try_get("destination_geohash")?,
        time_bucket_start: parse_timestamp(&bucket_start)?,
        time_bucket_minutes: u32::try_from(bucket_minutes).map_err(|_| {
            tripmesh_common::Error::Internal(format!(
                "Invalid bucket width {} for group",
                bucket_minutes
            ))
        })?,
    })
}

impl GroupStore for SqliteConnection {
    async fn find_group(&mut self, key: &GroupKey) -> Result<Option<GroupId>> {
        find_group(self, key).await
    }

    async fn insert_group(
        &mut self,
        key: &GroupKey,
        bucket_minutes: u32,
    ) -> std::result::Result<GroupId, InsertGroupError> {
        insert_group(self, key, bucket_minutes).await
    }
}
