use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use retention_core::config::AiConfig;
use retention_core::error::{RetentionError, RetentionResult};
use retention_core::types::{Tone, Variant};

use crate::client::ChatCompletionClient;
use crate::context::UserContext;

/// Parameters steering a generated message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSpec {
    pub tone: Tone,
    pub goal: String,
    pub base_prompt: String,
}

/// The personalization contract the queue processor talks to.
#[async_trait]
pub trait Personalizer: Send + Sync {
    /// Likelihood in [0, 1] that the user re-engages without intervention.
    async fn estimate_return_probability(&self, context: &UserContext) -> RetentionResult<f64>;

    /// Produce the outbound message text for the given spec and context.
    async fn generate_message(
        &self,
        context: &UserContext,
        spec: &MessageSpec,
    ) -> RetentionResult<String>;
}

/// Shift the authored tone based on the return-probability estimate:
/// the less likely the user is to come back on their own, the harder
/// the message leans on urgency and incentives.
pub fn adjust_tone(base: Tone, probability: f64) -> Tone {
    if probability < 0.25 {
        Tone::Incentive
    } else if probability < 0.5 {
        Tone::Urgent
    } else if probability < 0.75 {
        base
    } else {
        // Likely to return anyway: soften an aggressive authored tone.
        match base {
            Tone::Urgent | Tone::Incentive => Tone::Motivational,
            other => other,
        }
    }
}

/// Deterministic A/B bucket for a user. Stable across reprocessing:
/// derived from a hash of the user id, never from randomness.
pub fn select_variant(user_id: Uuid) -> Variant {
    let digest = Sha256::digest(user_id.as_bytes());
    if digest[0] % 2 == 0 {
        Variant::A
    } else {
        Variant::B
    }
}

/// Assemble the instruction prompt sent to the text-generation model.
pub fn build_prompt(context: &UserContext, spec: &MessageSpec) -> String {
    let activity = context
        .last_activity_kind
        .as_deref()
        .unwrap_or("nothing recorded");
    format!(
        "{base}\n\
         Write one short {tone:?} message in {lang} for {name}.\n\
         Goal: {goal}.\n\
         Context: inactive {days} days, last activity: {activity}, \
         segment: {segment:?}, engagement {score:.0}/100, \
         {sessions} sessions, {watch} minutes watched, \
         purchased before: {purchased}, active subscription: {subscribed}.",
        base = spec.base_prompt,
        tone = spec.tone,
        lang = context.language,
        name = context.name,
        goal = spec.goal,
        days = context.days_inactive,
        segment = context.segment,
        score = context.engagement_score,
        sessions = context.sessions_total,
        watch = context.watch_minutes_total,
        purchased = context.has_purchases,
        subscribed = context.has_active_subscription,
    )
}

// ---------------------------------------------------------------------------
// Heuristic personalizer
// ---------------------------------------------------------------------------

/// Deterministic, model-free personalizer. Used when no API key is
/// configured and as the fixture in tests.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPersonalizer;

impl HeuristicPersonalizer {
    pub fn new() -> Self {
        Self
    }

    /// Weighted feature score clamped to [0, 1].
    fn score(context: &UserContext) -> f64 {
        let mut p: f64 = 0.5;

        // Inactivity is the dominant negative signal.
        p -= (context.days_inactive as f64 * 0.03).min(0.4);
        // Engagement pulls back up to +0.25.
        p += f64::from(context.engagement_score) / 400.0;
        if context.has_active_subscription {
            p += 0.15;
        }
        if context.has_purchases {
            p += 0.1;
        }
        p += (context.sessions_total as f64 * 0.005).min(0.05);

        p.clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Personalizer for HeuristicPersonalizer {
    async fn estimate_return_probability(&self, context: &UserContext) -> RetentionResult<f64> {
        Ok(Self::score(context))
    }

    async fn generate_message(
        &self,
        context: &UserContext,
        spec: &MessageSpec,
    ) -> RetentionResult<String> {
        let opener = match spec.tone {
            Tone::Friendly => format!("Hi {}, we miss you!", context.name),
            Tone::Motivational => format!("{}, you were making real progress.", context.name),
            Tone::Urgent => format!("{}, your course is slipping away.", context.name),
            Tone::Incentive => {
                format!("{}, come back today and your next lesson is on us.", context.name)
            }
            Tone::Playful => format!("Psst, {}: your course got lonely.", context.name),
        };
        Ok(format!("{opener} {}.", spec.goal))
    }
}

// ---------------------------------------------------------------------------
// Model-backed personalizer
// ---------------------------------------------------------------------------

/// Transport seam for the chat-completion service, so the model-backed
/// personalizer is testable without a network.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Canned-response client for tests.
#[derive(Debug, Default)]
pub struct StubCompletionClient {
    pub response: String,
}

impl StubCompletionClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl CompletionClient for StubCompletionClient {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.response.clone())
    }
}

/// Personalizer backed by a text-generation model. Probability estimates
/// ask the model for a bare number; an unparseable reply falls back to
/// the heuristic score rather than failing the whole entry.
pub struct ModelPersonalizer {
    client: Arc<dyn CompletionClient>,
    fallback: HeuristicPersonalizer,
}

impl ModelPersonalizer {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            fallback: HeuristicPersonalizer::new(),
        }
    }
}

#[async_trait]
impl Personalizer for ModelPersonalizer {
    async fn estimate_return_probability(&self, context: &UserContext) -> RetentionResult<f64> {
        let prompt = format!(
            "Estimate the probability (0.0-1.0, answer with the number only) that this user \
             returns to the platform within a week on their own.\n{}",
            serde_json::to_string(context).unwrap_or_default()
        );
        let reply = self
            .client
            .complete(&prompt)
            .await
            .map_err(|e| RetentionError::Personalization(e.to_string()))?;

        match reply.trim().parse::<f64>() {
            Ok(p) if (0.0..=1.0).contains(&p) => Ok(p),
            _ => {
                debug!(reply = %reply, "Unparseable probability reply, using heuristic");
                self.fallback.estimate_return_probability(context).await
            }
        }
    }

    async fn generate_message(
        &self,
        context: &UserContext,
        spec: &MessageSpec,
    ) -> RetentionResult<String> {
        let prompt = build_prompt(context, spec);
        let text = self
            .client
            .complete(&prompt)
            .await
            .map_err(|e| RetentionError::Personalization(e.to_string()))?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(RetentionError::Personalization(
                "model returned empty message".to_string(),
            ));
        }
        info!(tone = ?spec.tone, chars = text.len(), "Generated personalized message");
        Ok(text)
    }
}

/// Pick the personalizer backend from configuration: a set api key
/// selects the model-backed personalizer, an empty key the heuristic.
pub fn personalizer_from_config(ai: &AiConfig) -> Arc<dyn Personalizer> {
    if ai.api_key.is_empty() {
        Arc::new(HeuristicPersonalizer::new())
    } else {
        Arc::new(ModelPersonalizer::new(Arc::new(ChatCompletionClient::new(
            ai.clone(),
        ))))
    }
}
