//! Utility helpers for clock access and unit rounding.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::Timestamp;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Clocks set before the epoch report `0`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn now_ms() -> Timestamp {
    // Safe to cast because millisecond counts stay far below i64::MAX
    // for any realistic wall-clock value.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as Timestamp)
}

/// Round a unit count to two decimal places for display and comparison.
#[must_use]
pub fn round_units(units: f64) -> f64 {
    (units * 100.0).round() / 100.0
}
