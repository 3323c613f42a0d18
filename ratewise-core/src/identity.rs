//! Identity types for rateables, raters and votes

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Star score submitted by a rater.
pub type Score = i32;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Arithmetic mean of `sum / count`, guarded so that an empty vote set
/// averages to `0.0` instead of NaN.
pub fn mean_or_zero(sum: i64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    sanitize_average(sum as f64 / count as f64)
}

/// Replace non-finite averages (NaN, infinities) with `0.0`.
///
/// Applied to cached values as well as freshly computed ones.
pub fn sanitize_average(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
