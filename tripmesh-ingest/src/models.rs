//! Domain records for trips, trip groups and ingestion jobs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tripmesh_common::JobStatus;
use uuid::Uuid;

/// Stable trip group identifier (row id)
pub type GroupId = i64;

/// One source record exactly as read from the CSV file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawRow {
    pub region: String,
    pub origin_coord: String,
    pub destination_coord: String,
    pub datetime: String,
    pub datasource: String,
}

/// Normalized trip ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTrip {
    pub region: String,
    pub origin_lat: f64,
    pub origin_lng: f64,
    pub destination_lat: f64,
    pub destination_lng: f64,
    pub started_at: NaiveDateTime,
    pub datasource: String,
    pub group_id: GroupId,
}

/// Identity key of a trip group. At most one group exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub region: String,
    pub origin_geohash: String,
    pub destination_geohash: String,
    pub time_bucket_start: NaiveDateTime,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}->{}@{}",
            self.region, self.origin_geohash, self.destination_geohash, self.time_bucket_start
        )
    }
}

/// Persisted trip group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripGroup {
    pub id: GroupId,
    pub region: String,
    pub origin_geohash: String,
    pub destination_geohash: String,
    pub time_bucket_start: NaiveDateTime,
    pub time_bucket_minutes: u32,
}

/// Trip group with the number of trips assigned to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripGroupSummary {
    #[serde(flatten)]
    pub group: TripGroup,
    pub trip_count: u64,
}

/// Tracked execution of one source file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub total_rows: Option<u64>,
    pub processed_rows: u64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial job update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub total_rows: Option<u64>,
    pub processed_rows: Option<u64>,
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_total(mut self, total_rows: Option<u64>) -> Self {
        self.total_rows = total_rows;
        self
    }

    pub fn with_processed(mut self, processed_rows: u64) -> Self {
        self.processed_rows = Some(processed_rows);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Origin bounding box filter, inclusive on all edges
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn is_valid(&self) -> bool {
        self.min_lat <= self.max_lat && self.min_lng <= self.max_lng
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BBox({},{})-({},{})",
            self.min_lat, self.min_lng, self.max_lat, self.max_lng
        )
    }
}

/// Weekly trip rate over the span of matching trips
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeeklyAverage {
    pub weekly_average: f64,
    pub total_trips: u64,
    pub week_count: u64,
}
