use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use retention_core::store::RetentionStore;
use retention_core::types::{QueueStatus, Variant};

/// Aggregated outcomes for one trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerReport {
    pub trigger_id: Uuid,
    pub trigger_name: String,
    pub total: u64,
    pub sent: u64,
    pub pending: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Cancelled entries, on the premise that cancellation implies the
    /// user converted or came back.
    pub returned: u64,
    pub conversion_rate: f64,
    pub ab_breakdown: HashMap<String, VariantStats>,
}

/// Per-variant send/return outcomes from the audit log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantStats {
    pub sent: u64,
    pub returned: u64,
    pub return_rate: f64,
}

/// Read-only reporting over the shared store.
pub struct Reporter {
    store: Arc<dyn RetentionStore>,
}

impl Reporter {
    pub fn new(store: Arc<dyn RetentionStore>) -> Self {
        Self { store }
    }

    /// Build the report for a single trigger. Unknown ids yield `None`.
    pub fn trigger_report(&self, trigger_id: Uuid) -> Option<TriggerReport> {
        let trigger = self.store.trigger(trigger_id)?;

        let mut sent = 0u64;
        let mut pending = 0u64;
        let mut failed = 0u64;
        let mut cancelled = 0u64;
        let mut total = 0u64;
        for entry in self.store.entries_for_trigger(trigger_id) {
            total += 1;
            match entry.status {
                QueueStatus::Sent => sent += 1,
                // A claimed entry still counts as in flight.
                QueueStatus::Pending | QueueStatus::Processing => pending += 1,
                QueueStatus::Failed => failed += 1,
                QueueStatus::Cancelled => cancelled += 1,
            }
        }

        let returned = cancelled;
        let conversion_rate = if total > 0 {
            returned as f64 / total as f64
        } else {
            0.0
        };

        let mut ab_breakdown: HashMap<String, VariantStats> = HashMap::new();
        for log in self.store.logs_for_trigger(trigger_id) {
            let Some(variant) = log.variant else { continue };
            let key = match variant {
                Variant::A => "A",
                Variant::B => "B",
            };
            let stats = ab_breakdown.entry(key.to_string()).or_default();
            stats.sent += 1;
            if log.returned {
                stats.returned += 1;
            }
        }
        for stats in ab_breakdown.values_mut() {
            stats.return_rate = if stats.sent > 0 {
                stats.returned as f64 / stats.sent as f64
            } else {
                0.0
            };
        }

        Some(TriggerReport {
            trigger_id,
            trigger_name: trigger.name,
            total,
            sent,
            pending,
            failed,
            cancelled,
            returned,
            conversion_rate,
            ab_breakdown,
        })
    }

    /// Reports for every active trigger.
    pub fn report_all(&self) -> Vec<TriggerReport> {
        self.store
            .active_triggers()
            .into_iter()
            .filter_map(|t| self.trigger_report(t.id))
            .collect()
    }
}
