//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use chrono::Utc;
use std::time::Duration;

#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds `age` before `now`; saturates instead of overflowing.
pub fn cutoff_ms(now: i64, age: Duration) -> i64 {
    let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
    now.saturating_sub(age_ms)
}
