//! Engagement score recalculation.
//!
//! The score is a 0-100 summary of recent activity, recomputed once per
//! processed queue entry so personalization always sees fresh numbers.

use chrono::{DateTime, Utc};

use crate::types::User;

/// Recompute the engagement score for a user as of `now`.
///
/// Recency dominates: a user active today starts near the top and loses
/// ground the longer they stay away. Volume (sessions, watch time) and
/// commitment (purchases, subscriptions) add on top.
pub fn recalculate(user: &User, now: DateTime<Utc>) -> f32 {
    let days_inactive = days_inactive(user, now);

    let recency = match days_inactive {
        0..=1 => 40.0,
        2..=3 => 30.0,
        4..=7 => 20.0,
        8..=14 => 10.0,
        15..=30 => 5.0,
        _ => 0.0,
    };

    let sessions = (user.sessions_total as f32 * 0.5).min(20.0);
    let watch = (user.watch_minutes_total as f32 / 30.0).min(20.0);
    let purchases = (user.purchases_count as f32 * 5.0).min(10.0);
    let subscriptions = if user.active_subscriptions > 0 { 10.0 } else { 0.0 };

    (recency + sessions + watch + purchases + subscriptions).clamp(0.0, 100.0)
}

/// Whole days since the user's last activity. Users who never showed any
/// activity are counted from registration.
pub fn days_inactive(user: &User, now: DateTime<Utc>) -> i64 {
    let reference = user.last_activity_at.unwrap_or(user.registered_at);
    (now - reference).num_days().max(0)
}
