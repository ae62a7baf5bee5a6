//! Telegram Bot API provider.

use async_trait::async_trait;
use tracing::{info, warn};

use retention_core::config::TelegramConfig;

use crate::Messenger;

/// Telegram messenger. Simulates the Bot API call and reports the
/// outcome as a bool, matching the adapter contract.
pub struct TelegramMessenger {
    config: TelegramConfig,
}

impl TelegramMessenger {
    pub fn new(config: TelegramConfig) -> Self {
        info!(
            api_base = %config.api_base_url,
            token_len = config.bot_token.len(),
            "Telegram messenger initialized"
        );
        Self { config }
    }

    /// Shared send path for all content kinds.
    async fn dispatch(
        &self,
        method: &str,
        chat_id: &str,
        payload: &str,
        caption: Option<&str>,
    ) -> bool {
        if chat_id.is_empty() || payload.is_empty() {
            warn!(method, chat_id, "Refusing send with empty chat id or payload");
            metrics::counter!("retention.telegram_send_failures").increment(1);
            return false;
        }
        if self.config.bot_token.is_empty() {
            warn!(method, "No bot token configured, send dropped");
            metrics::counter!("retention.telegram_send_failures").increment(1);
            return false;
        }

        info!(
            method,
            chat_id,
            payload_len = payload.len(),
            caption_len = caption.map_or(0, str::len),
            "Telegram send dispatched"
        );
        metrics::counter!("retention.telegram_sends").increment(1);
        true
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> bool {
        self.dispatch("sendMessage", chat_id, text, None).await
    }

    async fn send_photo(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool {
        self.dispatch("sendPhoto", chat_id, url, caption).await
    }

    async fn send_audio(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool {
        self.dispatch("sendAudio", chat_id, url, caption).await
    }

    async fn send_video(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool {
        self.dispatch("sendVideo", chat_id, url, caption).await
    }
}
