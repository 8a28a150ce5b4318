//! Aggregation over recorded drinks: totals, unit conversion, the session
//! unit cap, and calendar color buckets.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};
use crate::model::{
    DrinkKind, DrinkingSession, DrinksList, DrinksToUnits, Preferences, Timestamp, UnitsToColors,
};

/// Hard ceiling on the units a single session may hold.
pub const MAX_ALLOWED_UNITS: f64 = 99.0;

/// Sessions whose start lies further back than this no longer count as
/// recent activity.
pub const SESSION_EXPIRY_MS: i64 = 48 * 60 * 60 * 1000;

/// Total number of drinks across all timestamps.
#[must_use]
pub fn total_drinks(list: &DrinksList) -> u32 {
    list.values().flat_map(|drinks| drinks.values()).sum()
}

/// Total number of drinks of one kind.
#[must_use]
pub fn drinks_of_kind(list: &DrinksList, kind: DrinkKind) -> u32 {
    list.values()
        .filter_map(|drinks| drinks.get(&kind))
        .sum()
}

/// Total units across all timestamps under the given conversion table.
/// Kinds missing from the table contribute nothing.
#[must_use]
pub fn total_units(list: &DrinksList, conversion: &DrinksToUnits) -> f64 {
    list.values()
        .flat_map(|drinks| drinks.iter())
        .map(|(kind, count)| {
            let factor = conversion.get(kind).copied().unwrap_or(0.0);
            f64::from(*count) * factor
        })
        .sum()
}

/// Units a session's drinks amount to.
#[must_use]
pub fn session_units(session: &DrinkingSession, conversion: &DrinksToUnits) -> f64 {
    session
        .drinks
        .as_ref()
        .map_or(0.0, |drinks| total_units(drinks, conversion))
}

/// Units still available under the session cap. Negative when the list
/// is already past the cap.
#[must_use]
pub fn available_units(list: &DrinksList, conversion: &DrinksToUnits) -> f64 {
    MAX_ALLOWED_UNITS - total_units(list, conversion)
}

/// Record drinks like [`crate::model::add_drinks`], but refuse additions
/// that would push the session past [`MAX_ALLOWED_UNITS`] or that have no
/// conversion factor.
///
/// # Errors
///
/// Returns `SyncError::Schema` when the kind has no positive conversion
/// factor or when the addition would exceed the cap.
pub fn add_drinks_capped(
    list: &mut DrinksList,
    at: Timestamp,
    kind: DrinkKind,
    amount: u32,
    conversion: &DrinksToUnits,
) -> Result<()> {
    if amount == 0 {
        log::warn!("ignoring request to add zero drinks of kind {kind:?}");
        return Ok(());
    }
    let factor = conversion.get(&kind).copied().unwrap_or(0.0);
    if factor <= 0.0 || !factor.is_finite() {
        return Err(SyncError::Schema {
            field: "drinks_to_units",
            reason: format!("no usable unit conversion for {kind:?}"),
        });
    }
    let available = available_units(list, conversion);
    let added = f64::from(amount) * factor;
    if added > available {
        return Err(SyncError::Schema {
            field: "drinks",
            reason: format!(
                "adding {added:.2} units exceeds the {MAX_ALLOWED_UNITS} unit cap ({available:.2} available)"
            ),
        });
    }
    crate::model::add_drinks(list, at, kind, amount);
    Ok(())
}

/// Color bucket of a day in calendar views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarColor {
    /// Nothing recorded.
    Green,
    /// At or under the yellow threshold.
    Yellow,
    /// At or under the orange threshold.
    Orange,
    /// Above the orange threshold.
    Red,
    /// A blackout was recorded.
    Black,
}

/// Text color that stays readable on a [`CalendarColor`] background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextColor {
    /// For light backgrounds.
    Black,
    /// For saturated backgrounds.
    White,
}

impl CalendarColor {
    /// Readable text color on this background.
    #[must_use]
    pub fn text_color(self) -> TextColor {
        match self {
            CalendarColor::Yellow | CalendarColor::Orange => TextColor::Black,
            CalendarColor::Green | CalendarColor::Red | CalendarColor::Black => TextColor::White,
        }
    }
}

/// Bucket a unit total under the user's thresholds. Zero units is always
/// green.
#[must_use]
pub fn units_to_color(units: f64, thresholds: &UnitsToColors) -> CalendarColor {
    if units <= 0.0 {
        CalendarColor::Green
    } else if units <= thresholds.yellow {
        CalendarColor::Yellow
    } else if units <= thresholds.orange {
        CalendarColor::Orange
    } else {
        CalendarColor::Red
    }
}

/// Aggregate marking for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayMarking {
    /// Total units across the day's sessions.
    pub units: f64,
    /// Color bucket the day falls into.
    pub color: CalendarColor,
}

/// Fold a day's sessions into one marking. A day with no sessions has no
/// marking; any blackout turns the day black regardless of units.
pub fn day_marking<'a, I>(sessions: I, preferences: &Preferences) -> Option<DayMarking>
where
    I: IntoIterator<Item = &'a DrinkingSession>,
{
    let mut units = 0.0;
    let mut blackout = false;
    let mut any = false;
    for session in sessions {
        any = true;
        units += session_units(session, &preferences.drinks_to_units);
        blackout = blackout || session.blackout.unwrap_or(false);
    }
    if !any {
        return None;
    }
    let color = if blackout {
        CalendarColor::Black
    } else {
        units_to_color(units, &preferences.units_to_colors)
    };
    Some(DayMarking { units, color })
}

/// Whether a session's start lies beyond the recent-activity window.
#[must_use]
pub fn session_is_expired(session: &DrinkingSession, now: Timestamp) -> bool {
    session.start_time < now - SESSION_EXPIRY_MS
}

/// Length of a session in milliseconds; open sessions report zero.
#[must_use]
pub fn session_length(session: &DrinkingSession) -> i64 {
    session
        .end_time
        .map_or(0, |end_time| end_time - session.start_time)
}
