//! Persistence boundary for the retention engine.
//!
//! Every component takes an `Arc<dyn RetentionStore>` instead of a global
//! data-access handle, so tests substitute the in-memory implementation
//! and a production deployment can wrap the platform database.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{RetentionError, RetentionResult};
use crate::types::{QueueEntry, QueueStatus, Trigger, TriggerLog, User};

/// Store contract consumed by the matcher, processor, watcher and
/// reporting. Status-changing operations are atomic with respect to
/// concurrent claims.
pub trait RetentionStore: Send + Sync {
    // -- users --------------------------------------------------------
    fn user(&self, id: Uuid) -> Option<User>;
    fn users(&self) -> Vec<User>;
    fn save_user(&self, user: User) -> RetentionResult<()>;
    /// Persist a freshly recalculated engagement score.
    fn record_engagement(&self, user_id: Uuid, score: f32) -> RetentionResult<()>;

    // -- triggers -----------------------------------------------------
    fn trigger(&self, id: Uuid) -> Option<Trigger>;
    fn active_triggers(&self) -> Vec<Trigger>;
    fn save_trigger(&self, trigger: Trigger) -> RetentionResult<()>;

    // -- queue --------------------------------------------------------
    fn enqueue(&self, entry: QueueEntry) -> RetentionResult<()>;
    /// Pending entries due at `now`, oldest first, at most `limit`.
    fn due_entries(&self, now: DateTime<Utc>, limit: usize) -> Vec<QueueEntry>;
    /// Conditional `Pending -> Processing` claim. Returns `false` when
    /// the entry is gone or another worker already claimed it.
    fn claim(&self, entry_id: Uuid) -> bool;
    /// Validated status transition; stamps `sent_at` on `Sent`.
    fn transition(&self, entry_id: Uuid, to: QueueStatus) -> RetentionResult<()>;
    /// Release a claimed entry back to `Pending`, rescheduled to `until`.
    fn defer(&self, entry_id: Uuid, until: DateTime<Utc>) -> RetentionResult<()>;
    /// Whether an unfinished chain exists for this (user, trigger) pair.
    fn active_entry_exists(&self, user_id: Uuid, trigger_id: Uuid) -> bool;
    /// Whether anything was sent to this user (any trigger) after `since`.
    fn sent_since(&self, user_id: Uuid, since: DateTime<Utc>) -> bool;
    /// Bulk-cancel the user's pending entries; returns how many moved.
    fn cancel_pending_for_user(&self, user_id: Uuid) -> usize;
    fn entries_for_trigger(&self, trigger_id: Uuid) -> Vec<QueueEntry>;

    // -- audit log ----------------------------------------------------
    fn append_log(&self, log: TriggerLog) -> RetentionResult<()>;
    fn logs_for_trigger(&self, trigger_id: Uuid) -> Vec<TriggerLog>;
    /// Reconciliation: flag the user's log rows written after `since`
    /// as returned. Older campaigns are left untouched.
    fn mark_returned(&self, user_id: Uuid, since: DateTime<Utc>) -> usize;
}

/// `DashMap`-backed store used by the demo binary and every test.
#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<Uuid, User>,
    triggers: DashMap<Uuid, Trigger>,
    entries: DashMap<Uuid, QueueEntry>,
    logs: DashMap<Uuid, TriggerLog>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, id: Uuid) -> Option<QueueEntry> {
        self.entries.get(&id).map(|e| e.clone())
    }

    pub fn entries_for_user(&self, user_id: Uuid) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.clone())
            .collect()
    }
}

impl RetentionStore for InMemoryStore {
    fn user(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    fn users(&self) -> Vec<User> {
        self.users.iter().map(|u| u.clone()).collect()
    }

    fn save_user(&self, user: User) -> RetentionResult<()> {
        self.users.insert(user.id, user);
        Ok(())
    }

    fn record_engagement(&self, user_id: Uuid, score: f32) -> RetentionResult<()> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| RetentionError::NotFound(format!("user {user_id}")))?;
        user.engagement_score = score;
        Ok(())
    }

    fn trigger(&self, id: Uuid) -> Option<Trigger> {
        self.triggers.get(&id).map(|t| t.clone())
    }

    fn active_triggers(&self) -> Vec<Trigger> {
        let mut triggers: Vec<Trigger> = self
            .triggers
            .iter()
            .filter(|t| t.is_active)
            .map(|t| t.clone())
            .collect();
        triggers.sort_by_key(|t| t.created_at);
        triggers
    }

    fn save_trigger(&self, trigger: Trigger) -> RetentionResult<()> {
        self.triggers.insert(trigger.id, trigger);
        Ok(())
    }

    fn enqueue(&self, entry: QueueEntry) -> RetentionResult<()> {
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    fn due_entries(&self, now: DateTime<Utc>, limit: usize) -> Vec<QueueEntry> {
        let mut due: Vec<QueueEntry> = self
            .entries
            .iter()
            .filter(|e| e.status == QueueStatus::Pending && e.scheduled_at <= now)
            .map(|e| e.clone())
            .collect();
        due.sort_by_key(|e| e.scheduled_at);
        due.truncate(limit);
        due
    }

    fn claim(&self, entry_id: Uuid) -> bool {
        // get_mut holds the shard lock, making the check-and-set atomic.
        match self.entries.get_mut(&entry_id) {
            Some(mut entry) if entry.status == QueueStatus::Pending => {
                entry.status = QueueStatus::Processing;
                true
            }
            _ => false,
        }
    }

    fn transition(&self, entry_id: Uuid, to: QueueStatus) -> RetentionResult<()> {
        let mut entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| RetentionError::NotFound(format!("queue entry {entry_id}")))?;
        if !entry.status.can_transition(to) {
            return Err(RetentionError::InvalidTransition {
                from: entry.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        entry.status = to;
        if to == QueueStatus::Sent {
            entry.sent_at = Some(Utc::now());
        }
        Ok(())
    }

    fn defer(&self, entry_id: Uuid, until: DateTime<Utc>) -> RetentionResult<()> {
        let mut entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| RetentionError::NotFound(format!("queue entry {entry_id}")))?;
        if !entry.status.can_transition(QueueStatus::Pending) {
            return Err(RetentionError::InvalidTransition {
                from: entry.status.as_str().to_string(),
                to: QueueStatus::Pending.as_str().to_string(),
            });
        }
        entry.status = QueueStatus::Pending;
        entry.scheduled_at = until;
        Ok(())
    }

    fn active_entry_exists(&self, user_id: Uuid, trigger_id: Uuid) -> bool {
        self.entries.iter().any(|e| {
            e.user_id == user_id && e.trigger_id == trigger_id && e.status.is_active()
        })
    }

    fn sent_since(&self, user_id: Uuid, since: DateTime<Utc>) -> bool {
        self.entries.iter().any(|e| {
            e.user_id == user_id
                && e.status == QueueStatus::Sent
                && e.sent_at.is_some_and(|t| t >= since)
        })
    }

    fn cancel_pending_for_user(&self, user_id: Uuid) -> usize {
        let mut cancelled = 0;
        for mut entry in self.entries.iter_mut() {
            // Processing entries are mid-send and allowed to complete.
            if entry.user_id == user_id && entry.status == QueueStatus::Pending {
                entry.status = QueueStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    fn entries_for_trigger(&self, trigger_id: Uuid) -> Vec<QueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.trigger_id == trigger_id)
            .map(|e| e.clone())
            .collect()
    }

    fn append_log(&self, log: TriggerLog) -> RetentionResult<()> {
        self.logs.insert(log.id, log);
        Ok(())
    }

    fn logs_for_trigger(&self, trigger_id: Uuid) -> Vec<TriggerLog> {
        let mut logs: Vec<TriggerLog> = self
            .logs
            .iter()
            .filter(|l| l.trigger_id == trigger_id)
            .map(|l| l.clone())
            .collect();
        logs.sort_by_key(|l| l.created_at);
        logs
    }

    fn mark_returned(&self, user_id: Uuid, since: DateTime<Utc>) -> usize {
        let mut marked = 0;
        for mut log in self.logs.iter_mut() {
            if log.user_id == user_id && !log.returned && log.created_at >= since {
                log.returned = true;
                marked += 1;
            }
        }
        marked
    }
}

/// Seed a demo population and two campaigns, mirroring what an operator
/// would author through the platform. Used by the binary's demo mode.
pub fn seed_demo(store: &InMemoryStore) -> RetentionResult<()> {
    use crate::types::{
        AiSettings, ContentType, Segment, StepContent, Tone, TriggerCondition, TriggerStep,
    };

    tracing::info!("Seeding demo triggers and users");

    let now = Utc::now();

    let winback_id = Uuid::new_v4();
    let winback = Trigger {
        id: winback_id,
        name: "Inactive 3 days win-back".to_string(),
        condition: TriggerCondition::InactiveDays { days: 3 },
        is_active: true,
        steps: vec![
            TriggerStep {
                id: Uuid::new_v4(),
                trigger_id: winback_id,
                step_order: 0,
                delay_days: 0,
                content: StepContent {
                    content_type: ContentType::Text,
                    content_url: None,
                    content_text: None,
                },
                ai: Some(AiSettings {
                    tone: Tone::Friendly,
                    goal: "bring the user back to their course".to_string(),
                    base_prompt: "Remind the user what they were learning and invite them back"
                        .to_string(),
                    ab_variants: true,
                }),
            },
            TriggerStep {
                id: Uuid::new_v4(),
                trigger_id: winback_id,
                step_order: 1,
                delay_days: 2,
                content: StepContent {
                    content_type: ContentType::Video,
                    content_url: Some("https://cdn.example.com/comeback.mp4".to_string()),
                    content_text: Some("A 2-minute recap of where you left off".to_string()),
                },
                ai: None,
            },
        ],
        created_at: now,
    };

    let nopurchase_id = Uuid::new_v4();
    let nopurchase = Trigger {
        id: nopurchase_id,
        name: "Registered without purchase".to_string(),
        condition: TriggerCondition::RegisteredWithoutPurchase,
        is_active: true,
        steps: vec![TriggerStep {
            id: Uuid::new_v4(),
            trigger_id: nopurchase_id,
            step_order: 0,
            delay_days: 1,
            content: StepContent {
                content_type: ContentType::Text,
                content_url: None,
                content_text: Some(
                    "Your first course is waiting. Start with a free lesson today!".to_string(),
                ),
            },
            ai: None,
        }],
        created_at: now,
    };

    store.save_trigger(winback)?;
    store.save_trigger(nopurchase)?;

    let users = [
        ("Anna", Some("1001"), 5, Segment::AtRisk, 0, 0),
        ("Boris", Some("1002"), 0, Segment::Active, 1, 1),
        ("Clara", None, 10, Segment::Churned, 0, 0),
    ];
    for (name, chat_id, days_inactive, segment, purchases, subs) in users {
        store.save_user(User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            chat_id: chat_id.map(str::to_string),
            language: "en".to_string(),
            segment,
            engagement_score: 0.0,
            is_blocked: false,
            registered_at: now - Duration::days(40),
            last_activity_at: Some(now - Duration::days(days_inactive)),
            last_activity_kind: Some("lesson".to_string()),
            last_viewed_course_at: None,
            sessions_total: 12,
            watch_minutes_total: 90,
            purchases_count: purchases,
            active_subscriptions: subs,
            subscription_expires_at: None,
        })?;
    }

    Ok(())
}
