use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use retention_core::config::EngineConfig;
use retention_core::store::RetentionStore;

/// Outcome of one watcher pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelSummary {
    /// Users with recent activity who were checked against the queue.
    pub users_seen: usize,
    /// Pending entries moved to `Cancelled`.
    pub cancelled: usize,
}

/// Cancels pending campaign entries for users who came back on their
/// own. Cooperative: entries already claimed by a processor are left to
/// finish their in-flight send.
pub struct ActivityWatcher {
    store: Arc<dyn RetentionStore>,
    config: EngineConfig,
}

impl ActivityWatcher {
    pub fn new(store: Arc<dyn RetentionStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Entry point invoked by the scheduler.
    pub async fn cancel_if_active(&self) -> CancelSummary {
        let mut summary = CancelSummary::default();
        let cutoff = Utc::now() - Duration::hours(self.config.activity_window_hours);

        for user in self.store.users() {
            if !user.last_activity_at.is_some_and(|t| t >= cutoff) {
                continue;
            }
            summary.users_seen += 1;

            let cancelled = self.store.cancel_pending_for_user(user.id);
            if cancelled > 0 {
                summary.cancelled += cancelled;
                // Reconciliation: their earlier sends evidently worked,
                // or they returned regardless; either way, flag the logs.
                let marked = self.store.mark_returned(user.id, cutoff);
                debug!(
                    user_id = %user.id,
                    cancelled,
                    logs_marked = marked,
                    "Cancelled pending campaign, user is back"
                );
                metrics::counter!("retention.entries_cancelled").increment(cancelled as u64);
            }
        }

        info!(
            users_seen = summary.users_seen,
            cancelled = summary.cancelled,
            "Activity watcher pass complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retention_core::store::InMemoryStore;
    use retention_core::types::{
        ContentType, QueueEntry, QueueStatus, Segment, TriggerLog, TriggerLogMeta, User,
    };
    use uuid::Uuid;

    fn user(hours_since_activity: i64) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: "W".into(),
            chat_id: Some("9".into()),
            language: "en".into(),
            segment: Segment::Active,
            engagement_score: 0.0,
            is_blocked: false,
            registered_at: now - Duration::days(30),
            last_activity_at: Some(now - Duration::hours(hours_since_activity)),
            last_activity_kind: None,
            last_viewed_course_at: None,
            sessions_total: 1,
            watch_minutes_total: 5,
            purchases_count: 0,
            active_subscriptions: 0,
            subscription_expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_cancels_pending_for_recently_active_user() {
        let store = Arc::new(InMemoryStore::new());
        let active = user(2);
        let idle = user(72);
        let trigger_id = Uuid::new_v4();

        let active_entry = QueueEntry::pending(active.id, trigger_id, Uuid::new_v4(), Utc::now());
        let idle_entry = QueueEntry::pending(idle.id, trigger_id, Uuid::new_v4(), Utc::now());
        let active_entry_id = active_entry.id;
        let idle_entry_id = idle_entry.id;

        store.save_user(active.clone()).unwrap();
        store.save_user(idle).unwrap();
        store.enqueue(active_entry).unwrap();
        store.enqueue(idle_entry).unwrap();

        let watcher = ActivityWatcher::new(store.clone(), EngineConfig::default());
        let summary = watcher.cancel_if_active().await;

        assert_eq!(summary.cancelled, 1);
        assert_eq!(
            store.entry(active_entry_id).unwrap().status,
            QueueStatus::Cancelled
        );
        // The idle user's campaign keeps going.
        assert_eq!(store.entry(idle_entry_id).unwrap().status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn test_in_flight_entries_left_alone() {
        let store = Arc::new(InMemoryStore::new());
        let u = user(1);
        let entry = QueueEntry::pending(u.id, Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        let entry_id = entry.id;
        store.save_user(u).unwrap();
        store.enqueue(entry).unwrap();
        store.claim(entry_id);

        let watcher = ActivityWatcher::new(store.clone(), EngineConfig::default());
        let summary = watcher.cancel_if_active().await;

        assert_eq!(summary.cancelled, 0);
        assert_eq!(store.entry(entry_id).unwrap().status, QueueStatus::Processing);
    }

    fn sent_log(user_id: Uuid, trigger_id: Uuid, created_at: chrono::DateTime<Utc>) -> TriggerLog {
        TriggerLog {
            id: Uuid::new_v4(),
            trigger_id,
            user_id,
            status: QueueStatus::Sent,
            message_text: "earlier nudge".into(),
            ai_generated: false,
            variant: None,
            returned: false,
            metadata: TriggerLogMeta {
                step_order: 0,
                content_type: ContentType::Text,
                tone: None,
                goal: None,
            },
            created_at,
        }
    }

    #[tokio::test]
    async fn test_marks_recent_logs_returned_on_cancel() {
        let store = Arc::new(InMemoryStore::new());
        let u = user(3);
        let recent_trigger = Uuid::new_v4();
        let old_trigger = Uuid::new_v4();
        store.save_user(u.clone()).unwrap();
        store
            .enqueue(QueueEntry::pending(u.id, recent_trigger, Uuid::new_v4(), Utc::now()))
            .unwrap();
        store
            .append_log(sent_log(u.id, recent_trigger, Utc::now()))
            .unwrap();
        // A campaign from months ago is not evidence for this return.
        store
            .append_log(sent_log(u.id, old_trigger, Utc::now() - Duration::days(90)))
            .unwrap();

        let watcher = ActivityWatcher::new(store.clone(), EngineConfig::default());
        watcher.cancel_if_active().await;

        assert!(store.logs_for_trigger(recent_trigger)[0].returned);
        assert!(!store.logs_for_trigger(old_trigger)[0].returned);
    }
}
