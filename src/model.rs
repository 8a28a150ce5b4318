//! Typed schemas for the synced entities: sessions, drinks, preferences,
//! and user status.
//!
//! Payloads cross the wire as JSON. Every type here decodes through
//! [`decode`], which pairs `serde` deserialization with a [`Validate`]
//! pass so malformed data is rejected at the boundary instead of
//! surfacing as logic errors later.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};
use crate::paths::validate_segment;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Widest valid timezone offset, in minutes (UTC+14:00 / UTC-14:00).
pub const MAX_TZ_OFFSET_MINUTES: i32 = 14 * 60;

/// Kinds of drink a session can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrinkKind {
    /// Small beer (roughly 0.3 l).
    SmallBeer,
    /// Regular beer (roughly 0.5 l).
    Beer,
    /// Glass of wine.
    Wine,
    /// Low-alcohol shot.
    WeakShot,
    /// High-alcohol shot.
    StrongShot,
    /// Mixed drink.
    Cocktail,
    /// Anything else.
    Other,
}

impl DrinkKind {
    /// Every kind, in a stable order.
    pub const ALL: [DrinkKind; 7] = [
        DrinkKind::SmallBeer,
        DrinkKind::Beer,
        DrinkKind::Wine,
        DrinkKind::WeakShot,
        DrinkKind::StrongShot,
        DrinkKind::Cocktail,
        DrinkKind::Other,
    ];
}

/// Drink counts recorded at a single moment.
pub type Drinks = BTreeMap<DrinkKind, u32>;

/// A session's drinks, keyed by the timestamp they were added at.
pub type DrinksList = BTreeMap<Timestamp, Drinks>;

/// How a session came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// Recorded in real time.
    Live,
    /// Entered after the fact.
    Edit,
}

/// Fixed UTC offset a session was recorded in, in minutes east of UTC.
///
/// Bounded to ±14 hours at construction, so downstream conversions
/// cannot fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct TzOffset {
    minutes: i32,
}

impl TzOffset {
    /// UTC itself.
    pub const UTC: TzOffset = TzOffset { minutes: 0 };

    /// Build an offset a given number of minutes east of UTC.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Schema` if the offset exceeds ±14 hours.
    pub fn east_minutes(minutes: i32) -> Result<Self> {
        if minutes.abs() > MAX_TZ_OFFSET_MINUTES {
            return Err(SyncError::Schema {
                field: "timezone",
                reason: format!("offset {minutes} min is outside ±{MAX_TZ_OFFSET_MINUTES} min"),
            });
        }
        Ok(Self { minutes })
    }

    /// Minutes east of UTC.
    #[must_use]
    pub fn minutes(self) -> i32 {
        self.minutes
    }

    /// The equivalent `chrono` fixed offset.
    #[cfg(feature = "calendar")]
    #[must_use]
    pub fn fixed(self) -> chrono::FixedOffset {
        use chrono::Offset;
        match chrono::FixedOffset::east_opt(self.minutes * 60) {
            Some(offset) => offset,
            // Unreachable: the constructor bounds the range.
            None => chrono::Utc.fix(),
        }
    }
}

impl TryFrom<i32> for TzOffset {
    type Error = SyncError;

    fn try_from(minutes: i32) -> Result<Self> {
        Self::east_minutes(minutes)
    }
}

impl From<TzOffset> for i32 {
    fn from(offset: TzOffset) -> Self {
        offset.minutes
    }
}

/// Opaque identifier of a user, valid as a path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

/// Opaque identifier of a session, valid as a path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

macro_rules! path_segment_id {
    ($name:ident) => {
        impl $name {
            /// Build an identifier, rejecting empty strings and reserved
            /// path characters.
            ///
            /// # Errors
            ///
            /// Returns `SyncError::InvalidPathSegment` if the value cannot
            /// appear in a field path.
            pub fn new(id: impl Into<String>) -> Result<Self> {
                let id = id.into();
                validate_segment(&id)?;
                Ok(Self(id))
            }

            /// Construct from a value already known to be a valid segment.
            pub(crate) fn new_unchecked(id: String) -> Self {
                Self(id)
            }

            /// The identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = SyncError;

            fn try_from(id: String) -> Result<Self> {
                Self::new(id)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

path_segment_id!(UserId);
path_segment_id!(SessionId);

/// One drinking session as stored under a user's session collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrinkingSession {
    /// Session start.
    pub start_time: Timestamp,
    /// Session end. Live sessions keep this at the start until saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    /// Offset the session was recorded in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<TzOffset>,
    /// Recorded drinks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drinks: Option<DrinksList>,
    /// Whether the user blacked out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blackout: Option<bool>,
    /// Free-form note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Set while the session is being recorded live; stripped on save.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ongoing: Option<bool>,
    /// How the session came to exist.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub session_type: Option<SessionType>,
}

impl DrinkingSession {
    /// Fresh live session starting now: ongoing, empty, with both ends of
    /// the interval at `start_time` until drinks arrive and it is saved.
    #[must_use]
    pub fn live(start_time: Timestamp, timezone: TzOffset) -> Self {
        Self {
            start_time,
            end_time: Some(start_time),
            timezone: Some(timezone),
            drinks: None,
            blackout: Some(false),
            note: Some(String::new()),
            ongoing: Some(true),
            session_type: Some(SessionType::Live),
        }
    }

    /// Whether the session is still being recorded.
    #[must_use]
    pub fn is_ongoing(&self) -> bool {
        self.ongoing.unwrap_or(false)
    }

    /// Whether the session was recorded live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self.session_type, Some(SessionType::Live))
    }

    /// Timezone to interpret this session in, falling back to `default`.
    #[must_use]
    pub fn tz_or(&self, default: TzOffset) -> TzOffset {
        self.timezone.unwrap_or(default)
    }

    /// Timestamp new drinks should be recorded under: the current moment
    /// while the session is ongoing, the end of a finished live session,
    /// otherwise the session's start.
    #[must_use]
    pub fn drinks_timestamp(&self, now: Timestamp) -> Timestamp {
        if self.is_ongoing() {
            now
        } else if self.is_live() {
            self.end_time.unwrap_or(self.start_time)
        } else {
            self.start_time
        }
    }
}

/// Presence and latest-activity record for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatus {
    /// Last time the user was seen.
    pub last_online: Timestamp,
    /// Identifier of the most recent session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_session_id: Option<SessionId>,
    /// Denormalized copy of the most recent session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_session: Option<DrinkingSession>,
}

/// Which day calendar views start the week on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirstDayOfWeek {
    /// ISO weeks.
    Monday,
    /// US-style weeks.
    Sunday,
}

/// Unit thresholds that split days into color buckets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitsToColors {
    /// Up to this many units a day shows yellow.
    pub yellow: f64,
    /// Up to this many units a day shows orange; above it, red.
    pub orange: f64,
}

/// Per-kind conversion factors from drink counts to units.
pub type DrinksToUnits = BTreeMap<DrinkKind, f64>;

/// A user's tracking preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Week layout in calendar views.
    pub first_day_of_week: FirstDayOfWeek,
    /// Color thresholds.
    pub units_to_colors: UnitsToColors,
    /// Unit conversion table.
    pub drinks_to_units: DrinksToUnits,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            first_day_of_week: FirstDayOfWeek::Monday,
            units_to_colors: UnitsToColors {
                yellow: 5.0,
                orange: 10.0,
            },
            drinks_to_units: BTreeMap::from([
                (DrinkKind::SmallBeer, 0.5),
                (DrinkKind::Beer, 1.0),
                (DrinkKind::Wine, 1.0),
                (DrinkKind::WeakShot, 0.5),
                (DrinkKind::StrongShot, 1.0),
                (DrinkKind::Cocktail, 1.5),
                (DrinkKind::Other, 1.0),
            ]),
        }
    }
}

/// Payload that can police its own invariants after decoding.
pub trait Validate {
    /// Check schema invariants.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Schema` describing the first violation found.
    fn validate(&self) -> Result<()>;
}

impl Validate for DrinkingSession {
    fn validate(&self) -> Result<()> {
        if let Some(end_time) = self.end_time {
            if end_time < self.start_time {
                return Err(SyncError::Schema {
                    field: "end_time",
                    reason: format!("end {end_time} precedes start {}", self.start_time),
                });
            }
        }
        Ok(())
    }
}

impl Validate for UserStatus {
    fn validate(&self) -> Result<()> {
        if let Some(latest) = &self.latest_session {
            latest.validate()?;
        }
        Ok(())
    }
}

impl Validate for Preferences {
    fn validate(&self) -> Result<()> {
        let UnitsToColors { yellow, orange } = self.units_to_colors;
        if !yellow.is_finite() || !orange.is_finite() || yellow < 0.0 || orange < yellow {
            return Err(SyncError::Schema {
                field: "units_to_colors",
                reason: format!("thresholds must satisfy 0 <= yellow <= orange, got {yellow} / {orange}"),
            });
        }
        for (kind, factor) in &self.drinks_to_units {
            if !factor.is_finite() || *factor < 0.0 {
                return Err(SyncError::Schema {
                    field: "drinks_to_units",
                    reason: format!("conversion for {kind:?} must be a finite non-negative number, got {factor}"),
                });
            }
        }
        Ok(())
    }
}

/// Decode a JSON payload into a typed, validated value.
///
/// # Errors
///
/// Returns `SyncError::Serde` when the payload does not match the schema
/// and `SyncError::Schema` when it decodes but violates an invariant.
pub fn decode<T>(value: serde_json::Value) -> Result<T>
where
    T: DeserializeOwned + Validate,
{
    let decoded: T = serde_json::from_value(value)?;
    decoded.validate()?;
    Ok(decoded)
}

/// Which end of the timeline drink removal walks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveFrom {
    /// Newest entries first.
    Latest,
    /// Oldest entries first.
    Earliest,
}

/// Record `amount` drinks of one kind at the given timestamp, merging with
/// whatever is already recorded there.
///
/// A zero amount is logged and ignored.
pub fn add_drinks(list: &mut DrinksList, at: Timestamp, kind: DrinkKind, amount: u32) {
    if amount == 0 {
        log::warn!("ignoring request to add zero drinks of kind {kind:?}");
        return;
    }
    *list.entry(at).or_default().entry(kind).or_insert(0) += amount;
}

/// Remove up to `amount` drinks of one kind, walking timestamps from the
/// chosen end. Entries that reach zero are dropped entirely.
///
/// Returns how many drinks were actually removed.
pub fn remove_drinks(list: &mut DrinksList, kind: DrinkKind, amount: u32, from: RemoveFrom) -> u32 {
    if amount == 0 {
        log::warn!("ignoring request to remove zero drinks of kind {kind:?}");
        return 0;
    }
    let stamps: Vec<Timestamp> = match from {
        RemoveFrom::Latest => list.keys().rev().copied().collect(),
        RemoveFrom::Earliest => list.keys().copied().collect(),
    };
    let mut remaining = amount;
    for at in stamps {
        if remaining == 0 {
            break;
        }
        let Some(drinks) = list.get_mut(&at) else {
            continue;
        };
        if let Some(count) = drinks.get_mut(&kind) {
            let removed = (*count).min(remaining);
            *count -= removed;
            remaining -= removed;
            if *count == 0 {
                drinks.remove(&kind);
            }
        }
        if drinks.is_empty() {
            list.remove(&at);
        }
    }
    amount - remaining
}

/// Drop zero counts and the timestamps left empty by them.
pub fn drop_zero_counts(list: &mut DrinksList) {
    for drinks in list.values_mut() {
        drinks.retain(|_, count| *count > 0);
    }
    list.retain(|_, drinks| !drinks.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_list() -> DrinksList {
        BTreeMap::from([
            (100, BTreeMap::from([(DrinkKind::Beer, 2)])),
            (
                200,
                BTreeMap::from([(DrinkKind::Beer, 1), (DrinkKind::Wine, 1)]),
            ),
        ])
    }

    #[test]
    fn session_round_trips_with_renamed_type_field() {
        let session = DrinkingSession::live(1_700_000_000_000, TzOffset::UTC);
        let value = serde_json::to_value(&session).expect("serialize");
        assert_eq!(value["type"], json!("live"));
        assert_eq!(value["ongoing"], json!(true));
        assert!(value.get("drinks").is_none());

        let back: DrinkingSession = decode(value).expect("decode");
        assert_eq!(back, session);
    }

    #[test]
    fn decode_rejects_inverted_interval() {
        let payload = json!({
            "start_time": 2_000,
            "end_time": 1_000,
        });
        let err = decode::<DrinkingSession>(payload).expect_err("must fail validation");
        assert!(matches!(err, SyncError::Schema { field: "end_time", .. }));
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let payload = json!({ "start_time": "not a number" });
        let err = decode::<DrinkingSession>(payload).expect_err("must fail decoding");
        assert!(matches!(err, SyncError::Serde(_)));
    }

    #[test]
    fn ids_reject_reserved_characters() {
        assert!(UserId::new("alice").is_ok());
        assert!(UserId::new("").is_err());
        assert!(UserId::new("a#b").is_err());
        assert!(SessionId::new("s.1").is_err());
        assert!(SessionId::new("a/b").is_err());
    }

    #[test]
    fn tz_offset_is_bounded() {
        assert!(TzOffset::east_minutes(120).is_ok());
        assert!(TzOffset::east_minutes(-840).is_ok());
        assert!(TzOffset::east_minutes(841).is_err());
        let err = serde_json::from_value::<TzOffset>(json!(2_000)).expect_err("out of range");
        assert!(err.to_string().contains("timezone"));
    }

    #[test]
    fn drink_kinds_use_snake_case_on_the_wire() {
        let value = serde_json::to_value(DrinkKind::StrongShot).expect("serialize");
        assert_eq!(value, json!("strong_shot"));
        let list = sample_list();
        let value = serde_json::to_value(&list).expect("serialize list");
        assert_eq!(value["100"]["beer"], json!(2));
    }

    #[test]
    fn add_drinks_merges_and_ignores_zero() {
        let mut list = sample_list();
        add_drinks(&mut list, 100, DrinkKind::Beer, 3);
        add_drinks(&mut list, 300, DrinkKind::Cocktail, 1);
        add_drinks(&mut list, 400, DrinkKind::Other, 0);
        assert_eq!(list[&100][&DrinkKind::Beer], 5);
        assert_eq!(list[&300][&DrinkKind::Cocktail], 1);
        assert!(!list.contains_key(&400));
    }

    #[test]
    fn remove_drinks_walks_latest_first() {
        let mut list = sample_list();
        let removed = remove_drinks(&mut list, DrinkKind::Beer, 2, RemoveFrom::Latest);
        assert_eq!(removed, 2);
        // The newer entry lost its single beer and keeps only wine.
        assert_eq!(list[&200].get(&DrinkKind::Beer), None);
        assert_eq!(list[&200][&DrinkKind::Wine], 1);
        assert_eq!(list[&100][&DrinkKind::Beer], 1);
    }

    #[test]
    fn remove_drinks_walks_earliest_first_and_drops_empty_entries() {
        let mut list = sample_list();
        let removed = remove_drinks(&mut list, DrinkKind::Beer, 5, RemoveFrom::Earliest);
        assert_eq!(removed, 3);
        assert!(!list.contains_key(&100));
        assert_eq!(list[&200][&DrinkKind::Wine], 1);
    }

    #[test]
    fn drop_zero_counts_prunes_empty_levels() {
        let mut list = BTreeMap::from([
            (100, BTreeMap::from([(DrinkKind::Beer, 0)])),
            (200, BTreeMap::from([(DrinkKind::Wine, 1), (DrinkKind::Beer, 0)])),
        ]);
        drop_zero_counts(&mut list);
        assert!(!list.contains_key(&100));
        assert_eq!(list[&200].len(), 1);
    }

    #[test]
    fn drinks_timestamp_tracks_session_state() {
        let mut session = DrinkingSession::live(1_000, TzOffset::UTC);
        assert_eq!(session.drinks_timestamp(5_000), 5_000);
        session.ongoing = None;
        session.end_time = Some(2_000);
        assert_eq!(session.drinks_timestamp(5_000), 2_000);
        session.end_time = None;
        assert_eq!(session.drinks_timestamp(5_000), 1_000);
    }

    #[test]
    fn drinks_timestamp_of_a_finished_edit_session_is_its_start() {
        let mut session = DrinkingSession::live(1_000, TzOffset::UTC);
        session.ongoing = None;
        session.session_type = Some(SessionType::Edit);
        session.end_time = Some(2_000);
        assert_eq!(session.drinks_timestamp(5_000), 1_000);
        session.session_type = None;
        assert_eq!(session.drinks_timestamp(5_000), 1_000);
    }

    #[test]
    fn default_preferences_are_valid() {
        let preferences = Preferences::default();
        preferences.validate().expect("defaults must validate");
        assert_eq!(preferences.drinks_to_units.len(), DrinkKind::ALL.len());
        assert_eq!(preferences.drinks_to_units[&DrinkKind::Cocktail], 1.5);
    }
}
