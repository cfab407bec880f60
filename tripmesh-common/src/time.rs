//! Timestamp utilities and time bucketing

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};

/// Default bucket width in minutes
pub const DEFAULT_BUCKET_MINUTES: u32 = 60;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Floor `ts` to the start of its `width_minutes` bucket.
///
/// Subtracts `minute % width`, the seconds, and the sub-second remainder.
/// Buckets are aligned within the hour, so widths that do not divide 60
/// restart at every full hour. A width of 0 is treated as 1.
pub fn time_bucket(ts: NaiveDateTime, width_minutes: u32) -> NaiveDateTime {
    let width = width_minutes.max(1);
    let minute_offset = ts.minute() % width;

    ts - Duration::minutes(i64::from(minute_offset))
        - Duration::seconds(i64::from(ts.second()))
        - Duration::nanoseconds(i64::from(ts.nanosecond()))
}
