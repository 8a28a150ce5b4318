//! Lazy month-indexed session caches for calendar views.
//!
//! Sessions are indexed by the local calendar month (or day) of their
//! start time, under each session's own timezone with a cache-wide
//! default as fallback. Months materialize on demand and nothing already
//! materialized is ever recomputed, which keeps scrolling through a long
//! history cheap.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate};

use crate::errors::{Result, SyncError};
use crate::model::{DrinkingSession, Preferences, SessionId, Timestamp, TzOffset};
use crate::stats::{self, DayMarking};

/// Months the initial window spans: the current one plus the previous two.
pub const RECENT_MONTHS: usize = 3;

/// A calendar month, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    /// Build a month key.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Schema` unless `month` is in `1..=12`.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(SyncError::Schema {
                field: "month",
                reason: format!("month must be 1..=12, got {month}"),
            });
        }
        Ok(Self { year, month })
    }

    /// The month a date falls in.
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The month before this one.
    #[must_use]
    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// Calendar year.
    #[must_use]
    pub fn year(self) -> i32 {
        self.year
    }

    /// Calendar month, 1-based.
    #[must_use]
    pub fn month(self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Local calendar date of a millisecond timestamp under a fixed offset.
fn local_date(at: Timestamp, tz: TzOffset) -> NaiveDate {
    DateTime::from_timestamp_millis(at)
        .map(|utc| utc.with_timezone(&tz.fixed()).date_naive())
        .unwrap_or(NaiveDate::MIN)
}

fn month_days(month: MonthKey) -> impl Iterator<Item = NaiveDate> {
    let first = NaiveDate::from_ymd_opt(month.year, month.month, 1);
    std::iter::successors(first, |date| date.succ_opt())
        .take_while(move |date| date.year() == month.year && date.month() == month.month)
}

/// Lazily materialized view over a user's sessions, indexed by month.
pub struct SessionCache {
    default_tz: TzOffset,
    sessions: HashMap<SessionId, DrinkingSession>,
    index: BTreeMap<MonthKey, Vec<SessionId>>,
    cache: HashMap<SessionId, DrinkingSession>,
    loaded: BTreeMap<SessionId, DrinkingSession>,
}

impl SessionCache {
    /// Empty cache interpreting untagged sessions in `default_tz`.
    #[must_use]
    pub fn new(default_tz: TzOffset) -> Self {
        Self {
            default_tz,
            sessions: HashMap::new(),
            index: BTreeMap::new(),
            cache: HashMap::new(),
            loaded: BTreeMap::new(),
        }
    }

    /// Replace the raw session set and rebuild the month index. Already
    /// materialized sessions stay materialized.
    pub fn ingest<I>(&mut self, sessions: I)
    where
        I: IntoIterator<Item = (SessionId, DrinkingSession)>,
    {
        self.sessions = sessions.into_iter().collect();
        self.index.clear();
        for (id, session) in &self.sessions {
            let month = MonthKey::of(local_date(
                session.start_time,
                session.tz_or(self.default_tz),
            ));
            self.index.entry(month).or_default().push(id.clone());
        }
        for ids in self.index.values_mut() {
            ids.sort();
        }
    }

    /// Materialize one month and return its sessions. Sessions already
    /// prepared in an earlier load are reused, not recomputed.
    pub fn load_month(&mut self, month: MonthKey) -> Vec<&DrinkingSession> {
        let ids = self.index.get(&month).cloned().unwrap_or_default();
        for id in &ids {
            if self.loaded.contains_key(id) {
                continue;
            }
            let prepared = match self.cache.get(id) {
                Some(prepared) => prepared.clone(),
                None => {
                    let Some(raw) = self.sessions.get(id) else {
                        continue;
                    };
                    // Per-session preparation runs once per id; later
                    // loads of the same session hit this cache.
                    let prepared = raw.clone();
                    self.cache.insert(id.clone(), prepared.clone());
                    prepared
                }
            };
            self.loaded.insert(id.clone(), prepared);
        }
        ids.iter().filter_map(|id| self.loaded.get(id)).collect()
    }

    /// Materialize the initial window: the month of `today` plus the
    /// previous [`RECENT_MONTHS`]` - 1`.
    pub fn load_recent(&mut self, today: NaiveDate) {
        let mut month = MonthKey::of(today);
        for _ in 0..RECENT_MONTHS {
            self.load_month(month);
            month = month.previous();
        }
    }

    /// Everything materialized so far, in id order. Generated session ids
    /// sort by creation time, so this is chronological for generated ids.
    pub fn loaded(&self) -> impl Iterator<Item = (&SessionId, &DrinkingSession)> {
        self.loaded.iter()
    }

    /// Months that have at least one session, in chronological order.
    pub fn months(&self) -> impl Iterator<Item = MonthKey> + '_ {
        self.index.keys().copied()
    }

    /// Ids indexed under one month, whether materialized or not.
    #[must_use]
    pub fn month_ids(&self, month: MonthKey) -> &[SessionId] {
        self.index.get(&month).map_or(&[], Vec::as_slice)
    }
}

/// Lazily computed per-day calendar markings.
pub struct MarkedDates {
    default_tz: TzOffset,
    preferences: Preferences,
    sessions: HashMap<SessionId, DrinkingSession>,
    index: BTreeMap<NaiveDate, Vec<SessionId>>,
    markings: BTreeMap<NaiveDate, DayMarking>,
}

impl MarkedDates {
    /// Empty marking set under the given timezone fallback and thresholds.
    #[must_use]
    pub fn new(default_tz: TzOffset, preferences: Preferences) -> Self {
        Self {
            default_tz,
            preferences,
            sessions: HashMap::new(),
            index: BTreeMap::new(),
            markings: BTreeMap::new(),
        }
    }

    /// Replace the raw session set and rebuild the day index. Days already
    /// marked keep their marking, even if their sessions changed.
    pub fn ingest<I>(&mut self, sessions: I)
    where
        I: IntoIterator<Item = (SessionId, DrinkingSession)>,
    {
        self.sessions = sessions.into_iter().collect();
        self.index.clear();
        for (id, session) in &self.sessions {
            let day = local_date(session.start_time, session.tz_or(self.default_tz));
            self.index.entry(day).or_default().push(id.clone());
        }
        for ids in self.index.values_mut() {
            ids.sort();
        }
    }

    /// Compute the marking for one day. A day that is already marked is
    /// skipped; a day with no sessions stays unmarked.
    pub fn load_day(&mut self, date: NaiveDate) {
        if self.markings.contains_key(&date) {
            return;
        }
        let Some(ids) = self.index.get(&date) else {
            return;
        };
        let sessions = ids.iter().filter_map(|id| self.sessions.get(id));
        if let Some(marking) = stats::day_marking(sessions, &self.preferences) {
            self.markings.insert(date, marking);
        }
    }

    /// Compute markings for every day of one month.
    pub fn load_month(&mut self, month: MonthKey) {
        for date in month_days(month) {
            self.load_day(date);
        }
    }

    /// Marking of one day, if computed.
    #[must_use]
    pub fn marking(&self, date: NaiveDate) -> Option<DayMarking> {
        self.markings.get(&date).copied()
    }

    /// Unit total of one day, if computed.
    #[must_use]
    pub fn units(&self, date: NaiveDate) -> Option<f64> {
        self.markings.get(&date).map(|marking| marking.units)
    }

    /// Number of marked days.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markings.len()
    }

    /// Whether no day is marked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DrinkKind;
    use crate::stats::CalendarColor;

    // 2023-07-01T00:00:00Z
    const JULY_1: Timestamp = 1_688_169_600_000;
    const MINUTE_MS: i64 = 60 * 1000;

    fn sid(n: u32) -> SessionId {
        SessionId::new(format!("s{n:03}")).expect("valid id")
    }

    fn session_at(start: Timestamp, tz: Option<TzOffset>) -> DrinkingSession {
        let mut session = DrinkingSession::live(start, TzOffset::UTC);
        session.timezone = tz;
        session.ongoing = None;
        session
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn month_key_wraps_and_formats() {
        let january = MonthKey::new(2024, 1).expect("valid month");
        assert_eq!(january.previous(), MonthKey::new(2023, 12).expect("valid month"));
        assert_eq!(january.to_string(), "2024-01");
        assert!(MonthKey::new(2024, 13).is_err());
        assert!(MonthKey::new(2024, 0).is_err());
    }

    #[test]
    fn indexing_respects_per_session_timezone() {
        let mut cache = SessionCache::new(TzOffset::UTC);
        let behind = TzOffset::east_minutes(-60).expect("valid offset");
        cache.ingest([
            // 00:30 UTC on July 1st.
            (sid(1), session_at(JULY_1 + 30 * MINUTE_MS, None)),
            // Same instant, but recorded an hour behind UTC: June 30th.
            (sid(2), session_at(JULY_1 + 30 * MINUTE_MS, Some(behind))),
        ]);

        let june = MonthKey::new(2023, 6).expect("valid month");
        let july = MonthKey::new(2023, 7).expect("valid month");
        assert_eq!(cache.month_ids(july), [sid(1)]);
        assert_eq!(cache.month_ids(june), [sid(2)]);
    }

    #[test]
    fn load_month_materializes_lazily() {
        let mut cache = SessionCache::new(TzOffset::UTC);
        cache.ingest([
            (sid(1), session_at(JULY_1, None)),
            (sid(2), session_at(JULY_1 + MINUTE_MS, None)),
        ]);
        assert_eq!(cache.loaded().count(), 0);

        let july = MonthKey::new(2023, 7).expect("valid month");
        let loaded = cache.load_month(july);
        assert_eq!(loaded.len(), 2);
        assert_eq!(cache.loaded().count(), 2);

        // An empty month loads nothing.
        let empty = cache.load_month(MonthKey::new(2023, 1).expect("valid month"));
        assert!(empty.is_empty());
        assert_eq!(cache.loaded().count(), 2);
    }

    #[test]
    fn prepared_sessions_survive_reingest() {
        let mut cache = SessionCache::new(TzOffset::UTC);
        let original = session_at(JULY_1, None);
        cache.ingest([(sid(1), original.clone())]);
        let july = MonthKey::new(2023, 7).expect("valid month");
        cache.load_month(july);

        // Re-ingest the same id with edits; the prepared copy wins until
        // the cache is rebuilt.
        let mut edited = original.clone();
        edited.note = Some("edited".to_owned());
        cache.ingest([(sid(1), edited)]);
        let loaded = cache.load_month(july);
        assert_eq!(loaded[0].note, original.note);
    }

    #[test]
    fn load_recent_spans_a_year_boundary() {
        let mut cache = SessionCache::new(TzOffset::UTC);
        // 2024-01-10T00:00:00Z is within the 2024-01 window.
        let jan_2024 = 1_704_844_800_000;
        cache.ingest([
            (sid(1), session_at(jan_2024, None)),
            // Far in the past; outside the window.
            (sid(2), session_at(JULY_1, None)),
        ]);
        cache.load_recent(date(2024, 1, 15));
        let ids: Vec<_> = cache.loaded().map(|(id, _)| id.clone()).collect();
        assert_eq!(ids, [sid(1)]);

        let months: Vec<_> = cache.months().map(|month| month.to_string()).collect();
        assert_eq!(months, ["2023-07", "2024-01"]);
    }

    #[test]
    fn day_markings_aggregate_and_never_recompute() {
        let mut marked = MarkedDates::new(TzOffset::UTC, Preferences::default());
        let mut first = session_at(JULY_1 + 10 * MINUTE_MS, None);
        first.drinks = Some(BTreeMap::from([(
            JULY_1 + 10 * MINUTE_MS,
            BTreeMap::from([(DrinkKind::Beer, 2)]),
        )]));
        let mut second = session_at(JULY_1 + 200 * MINUTE_MS, None);
        second.drinks = Some(BTreeMap::from([(
            JULY_1 + 200 * MINUTE_MS,
            BTreeMap::from([(DrinkKind::Cocktail, 2)]),
        )]));
        marked.ingest([(sid(1), first.clone()), (sid(2), second.clone())]);

        let day = date(2023, 7, 1);
        assert!(marked.is_empty());
        marked.load_day(day);
        assert_eq!(marked.len(), 1);
        assert_eq!(marked.units(day), Some(5.0));
        assert_eq!(marked.marking(day).map(|m| m.color), Some(CalendarColor::Yellow));

        // A blackout added later does not disturb the existing marking.
        second.blackout = Some(true);
        marked.ingest([(sid(1), first), (sid(2), second)]);
        marked.load_day(day);
        assert_eq!(marked.marking(day).map(|m| m.color), Some(CalendarColor::Yellow));
    }

    #[test]
    fn load_month_marks_only_days_with_sessions() {
        let mut marked = MarkedDates::new(TzOffset::UTC, Preferences::default());
        marked.ingest([
            (sid(1), session_at(JULY_1, None)),
            (sid(2), session_at(JULY_1 + 24 * 60 * MINUTE_MS * 3, None)),
        ]);
        marked.load_month(MonthKey::new(2023, 7).expect("valid month"));
        assert_eq!(marked.len(), 2);
        assert!(marked.marking(date(2023, 7, 1)).is_some());
        assert!(marked.marking(date(2023, 7, 4)).is_some());
        assert!(marked.marking(date(2023, 7, 2)).is_none());
    }

    #[test]
    fn out_of_range_timestamps_bucket_to_the_floor_date() {
        assert_eq!(local_date(i64::MAX, TzOffset::UTC), NaiveDate::MIN);
    }
}
