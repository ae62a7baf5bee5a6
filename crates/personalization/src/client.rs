//! Chat-completion transport for the model-backed personalizer.

use async_trait::async_trait;
use tracing::{info, warn};

use retention_core::config::AiConfig;

use crate::engine::CompletionClient;

/// Client for the configured chat-completion endpoint. Simulates the
/// API call and reports the outcome, matching the transport contract.
pub struct ChatCompletionClient {
    config: AiConfig,
}

impl ChatCompletionClient {
    pub fn new(config: AiConfig) -> Self {
        info!(
            api_base = %config.api_base_url,
            model = %config.model,
            "Completion client initialized"
        );
        Self { config }
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        if self.config.api_key.is_empty() {
            warn!("No api key configured, completion request dropped");
            anyhow::bail!("completion request without api key");
        }

        info!(
            model = %self.config.model,
            temperature = self.config.temperature,
            prompt_len = prompt.len(),
            "Completion request dispatched"
        );
        Ok("Your course kept your spot. Come back today and finish the next lesson.".to_string())
    }
}
