use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use retention_core::config::AppConfig;
use retention_core::engagement;
use retention_core::error::{RetentionError, RetentionResult};
use retention_core::store::RetentionStore;
use retention_core::types::{
    ContentType, QueueEntry, QueueStatus, Tone, Trigger, TriggerLog, TriggerLogMeta, TriggerStep,
    User, Variant,
};
use retention_delivery::Messenger;
use retention_personalization::{
    adjust_tone, select_variant, MessageSpec, Personalizer, UserContext,
};

/// Outcome of one processing pass, returned to the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub deferred: usize,
    pub errors: Vec<String>,
}

/// Outcome of a single claimed entry.
enum Outcome {
    Sent,
    Cancelled,
    Deferred,
    Failed(String),
}

/// The state-machine core: claims due entries, applies cancellation
/// rules, personalizes, delivers, and schedules the next step.
pub struct QueueProcessor {
    store: Arc<dyn RetentionStore>,
    personalizer: Arc<dyn Personalizer>,
    messenger: Arc<dyn Messenger>,
    config: AppConfig,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn RetentionStore>,
        personalizer: Arc<dyn Personalizer>,
        messenger: Arc<dyn Messenger>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            personalizer,
            messenger,
            config,
        }
    }

    /// Entry point invoked by the scheduler. One entry's failure never
    /// stops the rest of the batch.
    pub async fn process_queue(&self) -> ProcessSummary {
        let mut summary = ProcessSummary::default();
        let due = self
            .store
            .due_entries(Utc::now(), self.config.engine.batch_size);

        for entry in due {
            // Atomic claim: a concurrent processor that got here first
            // owns the entry, skip silently.
            if !self.store.claim(entry.id) {
                debug!(entry_id = %entry.id, "Entry already claimed, skipping");
                continue;
            }
            summary.claimed += 1;

            match self.process_entry(&entry).await {
                Ok(Outcome::Sent) => {
                    summary.sent += 1;
                    metrics::counter!("retention.messages_sent").increment(1);
                }
                Ok(Outcome::Cancelled) => {
                    summary.cancelled += 1;
                    metrics::counter!("retention.entries_cancelled").increment(1);
                }
                Ok(Outcome::Deferred) => {
                    summary.deferred += 1;
                    metrics::counter!("retention.entries_deferred").increment(1);
                }
                Ok(Outcome::Failed(reason)) => {
                    summary.failed += 1;
                    summary.errors.push(format!("entry {}: {reason}", entry.id));
                    metrics::counter!("retention.entries_failed").increment(1);
                }
                Err(e) => {
                    warn!(entry_id = %entry.id, error = %e, "Entry processing error");
                    // Best effort: leave the entry terminal rather than
                    // stuck in Processing.
                    if let Err(te) = self.store.transition(entry.id, QueueStatus::Failed) {
                        summary.errors.push(format!("entry {}: {te}", entry.id));
                    }
                    summary.failed += 1;
                    summary.errors.push(format!("entry {}: {e}", entry.id));
                    metrics::counter!("retention.entries_failed").increment(1);
                }
            }
        }

        info!(
            claimed = summary.claimed,
            sent = summary.sent,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Queue processing pass complete"
        );
        summary
    }

    async fn process_entry(&self, entry: &QueueEntry) -> RetentionResult<Outcome> {
        let user = self
            .store
            .user(entry.user_id)
            .ok_or_else(|| RetentionError::NotFound(format!("user {}", entry.user_id)))?;

        // Contactability: no delivery handle, nothing to do.
        if !user.is_contactable() {
            return self.fail(entry.id, "user has no delivery handle");
        }

        // Cancellation: the user converted on their own, stop messaging.
        if user.has_converted() {
            self.store.transition(entry.id, QueueStatus::Cancelled)?;
            info!(entry_id = %entry.id, user_id = %user.id, "Entry cancelled, user converted");
            return Ok(Outcome::Cancelled);
        }

        // Rate limit also holds at send time: two triggers matched in the
        // same pass would otherwise both go out inside the window. Defer
        // past the window instead of dropping the chain.
        let now = Utc::now();
        let window = Duration::hours(self.config.engine.rate_limit_hours);
        if self.store.sent_since(user.id, now - window) {
            self.store.defer(entry.id, now + window)?;
            debug!(entry_id = %entry.id, user_id = %user.id, "Rate limited, entry deferred");
            return Ok(Outcome::Deferred);
        }

        let trigger = self
            .store
            .trigger(entry.trigger_id)
            .ok_or_else(|| RetentionError::NotFound(format!("trigger {}", entry.trigger_id)))?;
        let step = trigger
            .step(entry.step_id)
            .ok_or_else(|| RetentionError::NotFound(format!("step {}", entry.step_id)))?
            .clone();

        // Refresh the engagement score before personalization sees it.
        let score = engagement::recalculate(&user, now);
        self.store.record_engagement(user.id, score)?;
        let mut user = user;
        user.engagement_score = score;

        let (text, variant, tone) = self.compose_message(&user, &step).await?;

        if !self.deliver(&user, &step, &text).await {
            return self.fail(entry.id, "delivery failed");
        }

        self.store.transition(entry.id, QueueStatus::Sent)?;
        self.store.append_log(TriggerLog {
            id: Uuid::new_v4(),
            trigger_id: trigger.id,
            user_id: user.id,
            status: QueueStatus::Sent,
            message_text: text,
            ai_generated: step.ai.is_some(),
            variant,
            returned: false,
            metadata: TriggerLogMeta {
                step_order: step.step_order,
                content_type: step.content.content_type,
                tone,
                goal: step.ai.as_ref().map(|ai| ai.goal.clone()),
            },
            created_at: now,
        })?;

        self.schedule_next_step(&trigger, &step, user.id)?;

        Ok(Outcome::Sent)
    }

    /// Resolve the outbound text, A/B variant and effective tone for a
    /// step. Static steps use their authored text verbatim.
    async fn compose_message(
        &self,
        user: &User,
        step: &TriggerStep,
    ) -> RetentionResult<(String, Option<Variant>, Option<Tone>)> {
        let Some(ai) = &step.ai else {
            let text = step.content.content_text.clone().unwrap_or_default();
            return Ok((text, None, None));
        };

        let ai_timeout = StdDuration::from_millis(self.config.ai.timeout_ms);
        let context = UserContext::from_user(user, Utc::now());

        let probability = tokio::time::timeout(
            ai_timeout,
            self.personalizer.estimate_return_probability(&context),
        )
        .await
        .map_err(|_| RetentionError::Personalization("probability estimate timed out".into()))??;

        let tone = adjust_tone(ai.tone, probability);
        let variant = ai.ab_variants.then(|| select_variant(user.id));

        // Variant B leans harder on the goal; A keeps the authored prompt.
        let base_prompt = match variant {
            Some(Variant::B) => format!("{} Emphasize: {}.", ai.base_prompt, ai.goal),
            _ => ai.base_prompt.clone(),
        };
        let spec = MessageSpec {
            tone,
            goal: ai.goal.clone(),
            base_prompt,
        };

        let text = tokio::time::timeout(ai_timeout, self.personalizer.generate_message(&context, &spec))
            .await
            .map_err(|_| RetentionError::Personalization("message generation timed out".into()))??;

        debug!(
            user_id = %user.id,
            probability,
            adjusted_tone = ?tone,
            variant = ?variant,
            "Personalized step message"
        );
        Ok((text, variant, Some(tone)))
    }

    /// Dispatch by content type. Media kinds send the URL with the text
    /// as optional caption; text requires non-empty text. A timeout is a
    /// delivery failure.
    async fn deliver(&self, user: &User, step: &TriggerStep, text: &str) -> bool {
        let chat_id = user.chat_id.as_deref().unwrap_or_default();
        let caption = (!text.trim().is_empty()).then_some(text);
        let send_timeout = StdDuration::from_millis(self.config.telegram.send_timeout_ms);

        let send = async {
            match step.content.content_type {
                ContentType::Text => {
                    if text.trim().is_empty() {
                        warn!(step_id = %step.id, "Empty text for text step, not sending");
                        return false;
                    }
                    self.messenger.send_text(chat_id, text).await
                }
                ContentType::Photo | ContentType::Audio | ContentType::Video => {
                    let Some(url) = step.content.content_url.as_deref() else {
                        warn!(step_id = %step.id, "Media step without content url, not sending");
                        return false;
                    };
                    match step.content.content_type {
                        ContentType::Photo => self.messenger.send_photo(chat_id, url, caption).await,
                        ContentType::Audio => self.messenger.send_audio(chat_id, url, caption).await,
                        _ => self.messenger.send_video(chat_id, url, caption).await,
                    }
                }
            }
        };

        match tokio::time::timeout(send_timeout, send).await {
            Ok(delivered) => delivered,
            Err(_) => {
                warn!(step_id = %step.id, user_id = %user.id, "Delivery timed out");
                false
            }
        }
    }

    /// Chain the follow-up step, if the trigger has one. Called only
    /// after the current step reached `Sent`, so step k+1 never exists
    /// before step k went out.
    fn schedule_next_step(
        &self,
        trigger: &Trigger,
        current: &TriggerStep,
        user_id: Uuid,
    ) -> RetentionResult<()> {
        let Some(next) = trigger.next_step(current.step_order) else {
            return Ok(());
        };
        let scheduled_at = Utc::now() + Duration::days(next.delay_days);
        self.store
            .enqueue(QueueEntry::pending(user_id, trigger.id, next.id, scheduled_at))?;
        debug!(
            trigger_id = %trigger.id,
            user_id = %user_id,
            next_order = next.step_order,
            scheduled_at = %scheduled_at,
            "Scheduled next campaign step"
        );
        Ok(())
    }

    fn fail(&self, entry_id: Uuid, reason: &str) -> RetentionResult<Outcome> {
        self.store.transition(entry_id, QueueStatus::Failed)?;
        Ok(Outcome::Failed(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use retention_core::store::InMemoryStore;
    use retention_core::types::{AiSettings, Segment, StepContent, TriggerCondition};
    use retention_delivery::CaptureMessenger;
    use retention_personalization::HeuristicPersonalizer;

    fn user(chat_id: Option<&str>, purchases: u32) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: "Nadia".into(),
            chat_id: chat_id.map(str::to_string),
            language: "en".into(),
            segment: Segment::AtRisk,
            engagement_score: 0.0,
            is_blocked: false,
            registered_at: now - Duration::days(90),
            last_activity_at: Some(now - Duration::days(10)),
            last_activity_kind: Some("quiz".into()),
            last_viewed_course_at: None,
            sessions_total: 4,
            watch_minutes_total: 45,
            purchases_count: purchases,
            active_subscriptions: 0,
            subscription_expires_at: None,
        }
    }

    fn step(
        trigger_id: Uuid,
        order: u32,
        content_type: ContentType,
        url: Option<&str>,
        text: Option<&str>,
        ai: Option<AiSettings>,
    ) -> TriggerStep {
        TriggerStep {
            id: Uuid::new_v4(),
            trigger_id,
            step_order: order,
            delay_days: if order == 0 { 0 } else { 2 },
            content: StepContent {
                content_type,
                content_url: url.map(str::to_string),
                content_text: text.map(str::to_string),
            },
            ai,
        }
    }

    fn trigger(steps: Vec<TriggerStep>) -> Trigger {
        Trigger {
            id: steps[0].trigger_id,
            name: "flow".into(),
            condition: TriggerCondition::InactiveDays { days: 3 },
            is_active: true,
            steps,
            created_at: Utc::now(),
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        messenger: Arc<CaptureMessenger>,
        processor: QueueProcessor,
    }

    fn harness(messenger: CaptureMessenger) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let messenger = Arc::new(messenger);
        let processor = QueueProcessor::new(
            store.clone(),
            Arc::new(HeuristicPersonalizer::new()),
            messenger.clone(),
            AppConfig::default(),
        );
        Harness {
            store,
            messenger,
            processor,
        }
    }

    fn enqueue_due(h: &Harness, user: &User, trigger: &Trigger, step: &TriggerStep) -> Uuid {
        let entry = QueueEntry::pending(user.id, trigger.id, step.id, Utc::now());
        let id = entry.id;
        h.store.save_user(user.clone()).unwrap();
        h.store.save_trigger(trigger.clone()).unwrap();
        h.store.enqueue(entry).unwrap();
        id
    }

    #[tokio::test]
    async fn test_static_text_send_writes_log_and_no_next_step() {
        let h = harness(CaptureMessenger::new());
        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s = step(trigger_id, 0, ContentType::Text, None, Some("come back"), None);
        let t = trigger(vec![s.clone()]);
        let entry_id = enqueue_due(&h, &u, &t, &s);

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 0);

        let entry = h.store.entry(entry_id).unwrap();
        assert_eq!(entry.status, QueueStatus::Sent);
        assert!(entry.sent_at.is_some());

        let logs = h.store.logs_for_trigger(trigger_id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message_text, "come back");
        assert!(!logs[0].ai_generated);

        // Single-step trigger: nothing chained.
        assert_eq!(h.store.entries_for_trigger(trigger_id).len(), 1);
        assert_eq!(h.messenger.count(), 1);
    }

    #[tokio::test]
    async fn test_two_step_trigger_chains_next_step() {
        let h = harness(CaptureMessenger::new());
        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s1 = step(trigger_id, 0, ContentType::Text, None, Some("first"), None);
        let s2 = step(trigger_id, 1, ContentType::Text, None, Some("second"), None);
        let t = trigger(vec![s1.clone(), s2.clone()]);
        enqueue_due(&h, &u, &t, &s1);

        h.processor.process_queue().await;

        let entries = h.store.entries_for_trigger(trigger_id);
        assert_eq!(entries.len(), 2);
        let next = entries
            .iter()
            .find(|e| e.status == QueueStatus::Pending)
            .unwrap();
        assert_eq!(next.step_id, s2.id);
        let expected: DateTime<Utc> = Utc::now() + Duration::days(2);
        assert!((expected - next.scheduled_at).num_seconds().abs() < 5);

        // The follow-up is not due yet, so a second pass sends nothing.
        let second = h.processor.process_queue().await;
        assert_eq!(second.sent, 0);
    }

    #[tokio::test]
    async fn test_converted_user_cancels_instead_of_sending() {
        let h = harness(CaptureMessenger::new());
        let u = user(Some("500"), 1);
        let trigger_id = Uuid::new_v4();
        let s = step(trigger_id, 0, ContentType::Text, None, Some("hi"), None);
        let t = trigger(vec![s.clone()]);
        let entry_id = enqueue_due(&h, &u, &t, &s);

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.sent, 0);
        assert_eq!(h.store.entry(entry_id).unwrap().status, QueueStatus::Cancelled);
        assert_eq!(h.messenger.count(), 0);
        assert!(h.store.logs_for_trigger(trigger_id).is_empty());
    }

    #[tokio::test]
    async fn test_uncontactable_user_fails_without_send() {
        let h = harness(CaptureMessenger::new());
        let u = user(None, 0);
        let trigger_id = Uuid::new_v4();
        let s = step(trigger_id, 0, ContentType::Text, None, Some("hi"), None);
        let t = trigger(vec![s.clone()]);
        let entry_id = enqueue_due(&h, &u, &t, &s);

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(h.store.entry(entry_id).unwrap().status, QueueStatus::Failed);
        assert_eq!(h.messenger.count(), 0);
    }

    #[tokio::test]
    async fn test_empty_text_step_fails_without_send() {
        let h = harness(CaptureMessenger::new());
        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s = step(trigger_id, 0, ContentType::Text, None, Some("   "), None);
        let t = trigger(vec![s.clone()]);
        enqueue_due(&h, &u, &t, &s);

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(h.messenger.count(), 0);
    }

    #[tokio::test]
    async fn test_media_step_without_url_fails() {
        let h = harness(CaptureMessenger::new());
        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s = step(trigger_id, 0, ContentType::Video, None, Some("cap"), None);
        let t = trigger(vec![s.clone()]);
        enqueue_due(&h, &u, &t, &s);

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(h.messenger.count(), 0);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_terminal_no_log_no_next() {
        let h = harness(CaptureMessenger::failing());
        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s1 = step(
            trigger_id,
            0,
            ContentType::Video,
            Some("https://cdn/broken.mp4"),
            Some("watch"),
            None,
        );
        let s2 = step(trigger_id, 1, ContentType::Text, None, Some("later"), None);
        let t = trigger(vec![s1.clone(), s2]);
        let entry_id = enqueue_due(&h, &u, &t, &s1);

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(h.store.entry(entry_id).unwrap().status, QueueStatus::Failed);
        assert!(h.store.logs_for_trigger(trigger_id).is_empty());
        // No next step spawned after a failure.
        assert_eq!(h.store.entries_for_trigger(trigger_id).len(), 1);
    }

    #[tokio::test]
    async fn test_ai_step_sends_personalized_text_and_logs_variant() {
        let h = harness(CaptureMessenger::new());
        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s = step(
            trigger_id,
            0,
            ContentType::Text,
            None,
            None,
            Some(AiSettings {
                tone: Tone::Friendly,
                goal: "finish the course".into(),
                base_prompt: "Invite them back".into(),
                ab_variants: true,
            }),
        );
        let t = trigger(vec![s.clone()]);
        enqueue_due(&h, &u, &t, &s);

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.sent, 1);

        let logs = h.store.logs_for_trigger(trigger_id);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].ai_generated);
        assert!(logs[0].variant.is_some());
        assert!(logs[0].metadata.tone.is_some());
        // 10 days inactive, low engagement: tone escalated from Friendly.
        assert_ne!(logs[0].metadata.tone, Some(Tone::Friendly));
        assert!(logs[0].message_text.contains("Nadia"));
        assert_eq!(logs[0].variant, Some(select_variant(u.id)));

        // Engagement was recalculated before personalization.
        assert!(h.store.user(u.id).unwrap().engagement_score > 0.0);
    }

    #[tokio::test]
    async fn test_claimed_entry_is_skipped() {
        let h = harness(CaptureMessenger::new());
        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s = step(trigger_id, 0, ContentType::Text, None, Some("hi"), None);
        let t = trigger(vec![s.clone()]);
        let entry_id = enqueue_due(&h, &u, &t, &s);

        // Another worker claimed it between the scan and our claim.
        assert!(h.store.claim(entry_id));

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.claimed, 0);
        assert_eq!(summary.sent, 0);
        assert_eq!(h.messenger.count(), 0);
    }

    #[tokio::test]
    async fn test_one_bad_entry_does_not_stop_the_batch() {
        let h = harness(CaptureMessenger::new());
        let trigger_id = Uuid::new_v4();
        let s = step(trigger_id, 0, ContentType::Text, None, Some("hi"), None);
        let t = trigger(vec![s.clone()]);

        let good = user(Some("500"), 0);
        enqueue_due(&h, &good, &t, &s);
        // Entry pointing at a user the store does not know.
        let orphan = QueueEntry::pending(Uuid::new_v4(), trigger_id, s.id, Utc::now());
        h.store.enqueue(orphan).unwrap();

        let summary = h.processor.process_queue().await;
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.errors.is_empty());
    }

    struct SlowPersonalizer;

    #[async_trait]
    impl Personalizer for SlowPersonalizer {
        async fn estimate_return_probability(&self, _: &UserContext) -> RetentionResult<f64> {
            tokio::time::sleep(StdDuration::from_secs(3600)).await;
            Ok(0.5)
        }

        async fn generate_message(
            &self,
            _: &UserContext,
            _: &MessageSpec,
        ) -> RetentionResult<String> {
            Ok("unreachable".into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_personalization_timeout_fails_entry() {
        let store = Arc::new(InMemoryStore::new());
        let messenger = Arc::new(CaptureMessenger::new());
        let mut config = AppConfig::default();
        config.ai.timeout_ms = 50;
        let processor = QueueProcessor::new(
            store.clone(),
            Arc::new(SlowPersonalizer),
            messenger.clone(),
            config,
        );

        let u = user(Some("500"), 0);
        let trigger_id = Uuid::new_v4();
        let s = step(
            trigger_id,
            0,
            ContentType::Text,
            None,
            None,
            Some(AiSettings {
                tone: Tone::Friendly,
                goal: "g".into(),
                base_prompt: "p".into(),
                ab_variants: false,
            }),
        );
        let t = trigger(vec![s.clone()]);
        let entry = QueueEntry::pending(u.id, t.id, s.id, Utc::now());
        let entry_id = entry.id;
        store.save_user(u).unwrap();
        store.save_trigger(t).unwrap();
        store.enqueue(entry).unwrap();

        let summary = processor.process_queue().await;
        assert_eq!(summary.failed, 1);
        assert_eq!(store.entry(entry_id).unwrap().status, QueueStatus::Failed);
        assert_eq!(messenger.count(), 0);
    }
}
