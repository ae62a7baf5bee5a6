//! Condition predicates — pure evaluation of trigger conditions against
//! a user snapshot.

use chrono::{DateTime, Duration, Utc};

use retention_core::engagement::days_inactive;
use retention_core::types::{TriggerCondition, User};

/// Whether `user` qualifies for `condition` as of `now`. Blocked and
/// uncontactable users never qualify, regardless of the condition.
pub fn matches(condition: &TriggerCondition, user: &User, now: DateTime<Utc>) -> bool {
    if !user.is_contactable() {
        return false;
    }

    match condition {
        TriggerCondition::InactiveDays { days } => days_inactive(user, now) >= i64::from(*days),
        TriggerCondition::RegisteredWithoutPurchase => {
            user.purchases_count == 0 && now - user.registered_at > Duration::days(1)
        }
        TriggerCondition::SubscriptionExpiringSoon { within_days } => {
            user.active_subscriptions > 0
                && user.subscription_expires_at.is_some_and(|expires| {
                    expires > now && expires <= now + Duration::days(i64::from(*within_days))
                })
        }
        TriggerCondition::ViewedCourseWithoutSubscription { within_days } => {
            user.active_subscriptions == 0
                && user.last_viewed_course_at.is_some_and(|viewed| {
                    viewed >= now - Duration::days(i64::from(*within_days))
                })
        }
    }
}

/// Filter the population down to qualifying candidates.
pub fn candidates<'a>(
    condition: &TriggerCondition,
    users: &'a [User],
    now: DateTime<Utc>,
) -> Vec<&'a User> {
    users.iter().filter(|u| matches(condition, u, now)).collect()
}
