use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use retention_core::config::EngineConfig;
use retention_core::store::RetentionStore;
use retention_core::types::{QueueEntry, Trigger};

use crate::conditions;

/// Outcome of one matching pass, returned to the scheduler for logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSummary {
    pub triggers_checked: usize,
    pub enqueued: usize,
    pub errors: Vec<String>,
}

/// Scans the population per active trigger and enqueues first-step
/// entries for newly qualifying users.
pub struct TriggerMatcher {
    store: Arc<dyn RetentionStore>,
    config: EngineConfig,
}

impl TriggerMatcher {
    pub fn new(store: Arc<dyn RetentionStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Entry point invoked by the scheduler. A failure on one trigger is
    /// recorded and never aborts the others.
    pub async fn check_triggers(&self) -> MatchSummary {
        let mut summary = MatchSummary::default();
        let users = self.store.users();

        for trigger in self.store.active_triggers() {
            summary.triggers_checked += 1;
            match self.match_trigger(&trigger, &users) {
                Ok(enqueued) => summary.enqueued += enqueued,
                Err(e) => {
                    warn!(trigger_id = %trigger.id, error = %e, "Trigger matching failed");
                    summary.errors.push(format!("trigger {}: {e}", trigger.id));
                }
            }
        }

        info!(
            triggers = summary.triggers_checked,
            enqueued = summary.enqueued,
            errors = summary.errors.len(),
            "Trigger matching pass complete"
        );
        summary
    }

    fn match_trigger(
        &self,
        trigger: &Trigger,
        users: &[retention_core::types::User],
    ) -> Result<usize> {
        let Some(first_step) = trigger.first_step() else {
            debug!(trigger_id = %trigger.id, "Trigger has no steps, skipping");
            return Ok(0);
        };

        let now = Utc::now();
        let rate_limit_window = now - Duration::hours(self.config.rate_limit_hours);
        let mut enqueued = 0;

        for user in conditions::candidates(&trigger.condition, users, now) {
            // One active chain per (user, trigger).
            if self.store.active_entry_exists(user.id, trigger.id) {
                continue;
            }
            // Global cross-trigger rate limit: nothing for this user in
            // the suppression window, whatever trigger sent it.
            if self.store.sent_since(user.id, rate_limit_window) {
                debug!(user_id = %user.id, "Rate limited, skipping enqueue");
                continue;
            }

            let scheduled_at = now + Duration::days(first_step.delay_days);
            let entry = QueueEntry::pending(user.id, trigger.id, first_step.id, scheduled_at);
            self.store
                .enqueue(entry)
                .map_err(|e| anyhow!("enqueue for user {}: {e}", user.id))?;
            metrics::counter!("retention.entries_enqueued").increment(1);
            enqueued += 1;

            debug!(
                user_id = %user.id,
                trigger_id = %trigger.id,
                scheduled_at = %scheduled_at,
                "Enqueued first campaign step"
            );
        }

        Ok(enqueued)
    }
}
