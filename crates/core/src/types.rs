//! Shared domain types for the retention automation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user of the subscription product. Owned by the broader platform;
/// this engine reads it and only writes back the recalculated
/// engagement score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Delivery handle for the messaging channel. `None` means the user
    /// cannot be contacted.
    pub chat_id: Option<String>,
    pub language: String,
    pub segment: Segment,
    pub engagement_score: f32,
    pub is_blocked: bool,
    pub registered_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_activity_kind: Option<String>,
    pub last_viewed_course_at: Option<DateTime<Utc>>,
    pub sessions_total: u32,
    pub watch_minutes_total: u32,
    pub purchases_count: u32,
    pub active_subscriptions: u32,
    pub subscription_expires_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the user has converted on their own (any purchase or a
    /// currently active subscription). A pending campaign entry for a
    /// converted user is cancelled, never sent.
    pub fn has_converted(&self) -> bool {
        self.purchases_count > 0 || self.active_subscriptions > 0
    }

    /// Whether the engine is allowed to message this user at all.
    pub fn is_contactable(&self) -> bool {
        !self.is_blocked && self.chat_id.as_deref().is_some_and(|c| !c.is_empty())
    }
}

/// Coarse user classification used as personalization context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    New,
    Active,
    AtRisk,
    Churned,
    Vip,
}

/// A named condition plus its ordered campaign steps. Authored by an
/// operator; read-only at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: Uuid,
    pub name: String,
    pub condition: TriggerCondition,
    pub is_active: bool,
    /// Sorted by `step_order` ascending.
    pub steps: Vec<TriggerStep>,
    pub created_at: DateTime<Utc>,
}

impl Trigger {
    /// First step of the campaign sequence, if any.
    pub fn first_step(&self) -> Option<&TriggerStep> {
        self.steps.iter().min_by_key(|s| s.step_order)
    }

    /// The step immediately after `current_order`, if the sequence
    /// continues. Explicit ordered lookup, never positional indexing.
    pub fn next_step(&self, current_order: u32) -> Option<&TriggerStep> {
        self.steps
            .iter()
            .filter(|s| s.step_order > current_order)
            .min_by_key(|s| s.step_order)
    }

    /// Step lookup by id.
    pub fn step(&self, step_id: Uuid) -> Option<&TriggerStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// What qualifies a user for a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerCondition {
    /// No activity for at least `days` days.
    InactiveDays { days: u32 },
    /// Registered more than one day ago and never purchased anything.
    RegisteredWithoutPurchase,
    /// An active subscription expires within `within_days` days.
    SubscriptionExpiringSoon { within_days: u32 },
    /// Viewed a course within `within_days` days without holding an
    /// active subscription.
    ViewedCourseWithoutSubscription { within_days: u32 },
}

/// One message in a trigger's sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerStep {
    pub id: Uuid,
    pub trigger_id: Uuid,
    /// Sequence position within the trigger, starting at 0.
    pub step_order: u32,
    /// Offset in days from the previous step's send time (or from
    /// enqueue time for the first step).
    pub delay_days: i64,
    pub content: StepContent,
    /// Present when the step text is AI-generated.
    pub ai: Option<AiSettings>,
}

/// Static content payload of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepContent {
    pub content_type: ContentType,
    pub content_url: Option<String>,
    pub content_text: Option<String>,
}

/// Kind of payload a step delivers. Dispatch is a single `match` on
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Photo,
    Audio,
    Video,
}

/// Personalization settings for an AI-enabled step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    pub tone: Tone,
    pub goal: String,
    pub base_prompt: String,
    /// When set, users are deterministically split into A/B variants.
    pub ab_variants: bool,
}

/// Style the generated message should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Friendly,
    Motivational,
    Urgent,
    Incentive,
    Playful,
}

/// A/B bucket for a personalized step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::A => write!(f, "A"),
            Variant::B => write!(f, "B"),
        }
    }
}

/// One scheduled/attempted send for one user at one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trigger_id: Uuid,
    pub step_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn pending(
        user_id: Uuid,
        trigger_id: Uuid,
        step_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            trigger_id,
            step_id,
            scheduled_at,
            status: QueueStatus::Pending,
            sent_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a queue entry.
///
/// `Processing` is the claim marker: a worker conditionally moves an
/// entry from `Pending` to `Processing` before touching it, so two
/// concurrent processors never double-send the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    /// Valid transitions. `Sent`, `Failed` and `Cancelled` are terminal
    /// for the entry (a sent entry may spawn a *new* pending entry for
    /// the next step, but never changes state again itself).
    /// `Processing -> Pending` releases a claim when the processor defers
    /// an entry instead of acting on it.
    pub fn can_transition(self, to: QueueStatus) -> bool {
        use QueueStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Pending)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

/// Immutable audit record written on every successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerLog {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub user_id: Uuid,
    pub status: QueueStatus,
    /// The exact text that went out.
    pub message_text: String,
    pub ai_generated: bool,
    pub variant: Option<Variant>,
    /// Set later by reconciliation when the user shows up again.
    pub returned: bool,
    pub metadata: TriggerLogMeta,
    pub created_at: DateTime<Utc>,
}

/// Step-level metadata captured alongside a log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerLogMeta {
    pub step_order: u32,
    pub content_type: ContentType,
    pub tone: Option<Tone>,
    pub goal: Option<String>,
}
