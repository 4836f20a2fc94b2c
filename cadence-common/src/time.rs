//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as milliseconds since the Unix epoch
///
/// History rows store this form so time-window queries compare integers.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Time elapsed since `since`, saturating at zero for timestamps in the future
pub fn elapsed_since(since: DateTime<Utc>) -> Duration {
    (Utc::now() - since).to_std().unwrap_or(Duration::ZERO)
}

/// Convert seconds (possibly fractional) to a duration, clamping negatives to zero
pub fn secs_f64(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}
