//! Display-priority scoring: which users surface first in a friend list.
//!
//! Scores favor users who are drinking right now, weight in how much they
//! have had, and decay logarithmically with time since their last session
//! started. Expired sessions contribute only the decay term.

use std::collections::HashMap;

use crate::model::{Timestamp, UserId, UserStatus};
use crate::stats;

/// Priority of a user with no recorded session at all.
pub const NO_SESSION_PRIORITY: f64 = -1e10;

/// Score one user's status.
#[must_use]
pub fn user_priority(status: &UserStatus, now: Timestamp) -> f64 {
    let Some(latest) = &status.latest_session else {
        return NO_SESSION_PRIORITY;
    };
    // Clamp to one millisecond so sessions stamped "now" (or slightly
    // ahead of this clock) do not produce ln(0) or a NaN.
    let elapsed_ms = (now - latest.start_time).max(1);
    let time_coefficient = -50.0 * (elapsed_ms as f64).ln();
    if stats::session_is_expired(latest, now) {
        return time_coefficient;
    }
    let active = if latest.is_ongoing() { 1.0 } else { 0.0 };
    let drinks = latest.drinks.as_ref().map_or(0, stats::total_drinks);
    active * 500.0 + f64::from(drinks) * active * 10.0 + time_coefficient
}

/// Score a set of users. Users missing from `statuses` score zero.
#[must_use]
pub fn user_priorities(
    users: &[UserId],
    statuses: &HashMap<UserId, UserStatus>,
    now: Timestamp,
) -> HashMap<UserId, f64> {
    users
        .iter()
        .map(|user| {
            let priority = statuses
                .get(user)
                .map_or(0.0, |status| user_priority(status, now));
            (user.clone(), priority)
        })
        .collect()
}

/// Order users by descending priority, breaking ties by identifier so the
/// ordering is total.
#[must_use]
pub fn rank_users(
    users: &[UserId],
    statuses: &HashMap<UserId, UserStatus>,
    now: Timestamp,
) -> Vec<UserId> {
    let priorities = user_priorities(users, statuses, now);
    let mut ranked = users.to_vec();
    ranked.sort_by(|a, b| {
        let pa = priorities.get(a).copied().unwrap_or(0.0);
        let pb = priorities.get(b).copied().unwrap_or(0.0);
        pb.total_cmp(&pa).then_with(|| a.cmp(b))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DrinkKind, DrinkingSession, TzOffset};
    use std::collections::BTreeMap;

    const NOW: Timestamp = 1_700_000_000_000;
    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn status_with(session: Option<DrinkingSession>) -> UserStatus {
        UserStatus {
            last_online: NOW,
            latest_session_id: None,
            latest_session: session,
        }
    }

    fn session(started_ago: i64, ongoing: bool, beers: u32) -> DrinkingSession {
        let mut session = DrinkingSession::live(NOW - started_ago, TzOffset::UTC);
        session.ongoing = ongoing.then_some(true);
        if beers > 0 {
            session.drinks = Some(BTreeMap::from([(
                NOW - started_ago,
                BTreeMap::from([(DrinkKind::Beer, beers)]),
            )]));
        }
        session
    }

    #[test]
    fn no_session_sits_at_the_floor() {
        let status = status_with(None);
        assert_eq!(user_priority(&status, NOW), NO_SESSION_PRIORITY);
    }

    #[test]
    fn active_sessions_outrank_idle_ones() {
        let active = status_with(Some(session(HOUR_MS, true, 3)));
        let idle = status_with(Some(session(HOUR_MS, false, 3)));
        let pa = user_priority(&active, NOW);
        let pi = user_priority(&idle, NOW);
        // Same decay; the active one adds 500 + 3 drinks * 10.
        assert!((pa - pi - 530.0).abs() < 1e-9);
        assert!(pa > pi);
    }

    #[test]
    fn drinks_only_count_while_active() {
        let light = status_with(Some(session(HOUR_MS, false, 1)));
        let heavy = status_with(Some(session(HOUR_MS, false, 9)));
        assert_eq!(user_priority(&light, NOW), user_priority(&heavy, NOW));
    }

    #[test]
    fn expired_sessions_keep_only_the_decay_term() {
        let expired = status_with(Some(session(3 * 24 * HOUR_MS, true, 5)));
        let expected = -50.0 * ((3 * 24 * HOUR_MS) as f64).ln();
        assert_eq!(user_priority(&expired, NOW), expected);
    }

    #[test]
    fn future_start_times_do_not_produce_nan() {
        let skewed = status_with(Some(session(-5_000, true, 0)));
        let priority = user_priority(&skewed, NOW);
        assert!(priority.is_finite());
        assert_eq!(priority, 500.0);
    }

    #[test]
    fn ranking_is_descending_with_id_tie_break() {
        let ids: Vec<UserId> = ["dana", "alice", "carol", "bob"]
            .into_iter()
            .map(|id| UserId::new(id).expect("valid id"))
            .collect();
        let mut statuses = HashMap::new();
        // alice: drinking now; bob: finished an hour ago; carol: nothing
        // recorded. dana has no status at all and scores a flat zero.
        statuses.insert(ids[1].clone(), status_with(Some(session(HOUR_MS, true, 2))));
        statuses.insert(ids[3].clone(), status_with(Some(session(HOUR_MS, false, 2))));
        statuses.insert(ids[2].clone(), status_with(None));

        let ranked = rank_users(&ids, &statuses, NOW);
        let names: Vec<&str> = ranked.iter().map(UserId::as_str).collect();
        assert_eq!(names, ["dana", "alice", "bob", "carol"]);
    }

    #[test]
    fn missing_statuses_tie_break_by_id() {
        let ids: Vec<UserId> = ["zed", "amy"]
            .into_iter()
            .map(|id| UserId::new(id).expect("valid id"))
            .collect();
        let ranked = rank_users(&ids, &HashMap::new(), NOW);
        let names: Vec<&str> = ranked.iter().map(UserId::as_str).collect();
        assert_eq!(names, ["amy", "zed"]);
    }
}
