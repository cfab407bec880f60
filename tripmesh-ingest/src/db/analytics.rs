//! Read-side queries over trips and trip groups

use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tripmesh_common::Result;

use super::groups::group_from_row;
use super::parse_timestamp;
use crate::models::{BoundingBox, TripGroupSummary, WeeklyAverage};

/// Trip groups ordered by trip count, most populous first
pub async fn list_trip_groups(conn: &mut SqliteConnection, limit: u32) -> Result<Vec<TripGroupSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT g.id, g.region, g.origin_geohash, g.destination_geohash,
               g.time_bucket_start, g.time_bucket_minutes,
               COUNT(t.id) AS trip_count
        FROM trip_groups g
        JOIN trips t ON t.group_id = g.id
        GROUP BY g.id
        ORDER BY trip_count DESC, g.id ASC
        LIMIT ?
        "#,
    )
    .bind(i64::from(limit))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<TripGroupSummary> {
            let trip_count: i64 = row.try_get("trip_count")?;
            Ok(TripGroupSummary {
                group: group_from_row(row)?,
                trip_count: trip_count.max(0) as u64,
            })
        })
        .collect()
}

/// Total number of trip groups
pub async fn count_trip_groups(conn: &mut SqliteConnection) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trip_groups")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count.max(0) as u64)
}

/// Number of weeks spanned by `elapsed_days`: `ceil(days / 7)`, at least 1
pub fn week_count(elapsed_days: i64) -> u64 {
    let days = elapsed_days.max(0) as u64;
    days.div_ceil(7).max(1)
}

/// Average trips per week for trips matching the optional filters.
///
/// The bounding box applies to trip origins. No matching trips yields
/// an all-zero result.
pub async fn compute_weekly_average(
    conn: &mut SqliteConnection,
    region: Option<&str>,
    bbox: Option<BoundingBox>,
) -> Result<WeeklyAverage> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT COUNT(id) AS total, MIN(started_at) AS first_started, \
         MAX(started_at) AS last_started FROM trips WHERE 1 = 1",
    );
    if let Some(region) = region {
        query.push(" AND region = ").push_bind(region.to_string());
    }
    if let Some(bbox) = bbox {
        query
            .push(" AND origin_lat >= ")
            .push_bind(bbox.min_lat)
            .push(" AND origin_lat <= ")
            .push_bind(bbox.max_lat)
            .push(" AND origin_lng >= ")
            .push_bind(bbox.min_lng)
            .push(" AND origin_lng <= ")
            .push_bind(bbox.max_lng);
    }

    let row = query.build().fetch_one(&mut *conn).await?;
    let total: i64 = row.try_get("total")?;
    let first: Option<String> = row.try_get("first_started")?;
    let last: Option<String> = row.try_get("last_started")?;

    let (Some(first), Some(last)) = (first, last) else {
        return Ok(WeeklyAverage {
            weekly_average: 0.0,
            total_trips: 0,
            week_count: 0,
        });
    };
    if total <= 0 {
        return Ok(WeeklyAverage {
            weekly_average: 0.0,
            total_trips: 0,
            week_count: 0,
        });
    }

    let elapsed_days = (parse_timestamp(&last)? - parse_timestamp(&first)?).num_days();
    let weeks = week_count(elapsed_days);
    let total_trips = total as u64;

    Ok(WeeklyAverage {
        weekly_average: total_trips as f64 / weeks as f64,
        total_trips,
        week_count: weeks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_week_count_rounds_up_with_minimum_one() {
        assert_eq!(week_count(0), 1);
        assert_eq!(week_count(1), 1);
        assert_eq!(week_count(7), 1);
        assert_eq!(week_count(8), 2);
        assert_eq!(week_count(13), 2);
        assert_eq!(week_count(14), 2);
        assert_eq!(week_count(15), 3);
        assert_eq!(week_count(-3), 1);
    }
}
