use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use retention_core::engagement;
use retention_core::types::{Segment, User};

/// Snapshot of everything the personalization model sees about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub name: String,
    pub days_inactive: i64,
    pub last_activity_kind: Option<String>,
    pub segment: Segment,
    pub engagement_score: f32,
    pub sessions_total: u32,
    pub watch_minutes_total: u32,
    pub has_purchases: bool,
    pub has_active_subscription: bool,
    pub language: String,
}

impl UserContext {
    pub fn from_user(user: &User, now: DateTime<Utc>) -> Self {
        Self {
            name: user.name.clone(),
            days_inactive: engagement::days_inactive(user, now),
            last_activity_kind: user.last_activity_kind.clone(),
            segment: user.segment,
            engagement_score: user.engagement_score,
            sessions_total: user.sessions_total,
            watch_minutes_total: user.watch_minutes_total,
            has_purchases: user.purchases_count > 0,
            has_active_subscription: user.active_subscriptions > 0,
            language: user.language.clone(),
        }
    }
}
