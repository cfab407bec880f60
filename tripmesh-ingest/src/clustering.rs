//! Row normalization: WKT point and timestamp parsing, group key derivation

use chrono::NaiveDateTime;
use tripmesh_common::config::IngestSettings;
use tripmesh_common::geo::encode_geohash;
use tripmesh_common::time::time_bucket;

use crate::error::{IngestError, IngestResult};
use crate::models::GroupKey;

const POINT_MARKER: &str = "POINT";

/// Accepted timestamp layouts, tried in order
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse `POINT (<lng> <lat>)` into `(lat, lng)`.
pub fn parse_point(text: &str) -> IngestResult<(f64, f64)> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix(POINT_MARKER)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| IngestError::Parse(format!("Unsupported point format: {}", trimmed)))?;

    let tokens: Vec<&str> = body.split_whitespace().collect();
    let [lng, lat] = tokens.as_slice() else {
        return Err(IngestError::Parse(format!(
            "Expected two coordinates in point: {}",
            trimmed
        )));
    };

    let lng: f64 = parse_coordinate(lng, trimmed)?;
    let lat: f64 = parse_coordinate(lat, trimmed)?;
    Ok((lat, lng))
}

fn parse_coordinate(token: &str, point: &str) -> IngestResult<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| IngestError::Parse(format!("Non-numeric coordinate '{}' in {}", token, point)))
}

/// Parse a naive `YYYY-MM-DD HH:MM:SS` timestamp (fraction and `T` separator tolerated)
pub fn parse_datetime(text: &str) -> IngestResult<NaiveDateTime> {
    let trimmed = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| IngestError::Parse(format!("Invalid datetime: {}", trimmed)))
}

/// Derive the trip group identity key for one trip
pub fn group_key(
    settings: &IngestSettings,
    region: &str,
    origin: (f64, f64),
    destination: (f64, f64),
    started_at: NaiveDateTime,
) -> GroupKey {
    GroupKey {
        region: region.to_string(),
        origin_geohash: encode_geohash(origin.0, origin.1, settings.geohash_precision),
        destination_geohash: encode_geohash(destination.0, destination.1, settings.geohash_precision),
        time_bucket_start: time_bucket(started_at, settings.time_bucket_minutes),
    }
}
