//! Delivery — the messaging-channel boundary. The engine only ever talks
//! to the [`Messenger`] trait; the Telegram provider and the capture
//! double both live here.

pub mod capture;
pub mod telegram;

use async_trait::async_trait;

/// Messaging-channel adapter. Failure is reported as `false`, never as
/// an error — the queue processor turns `false` into a `Failed` entry.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> bool;
    async fn send_photo(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool;
    async fn send_audio(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool;
    async fn send_video(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool;
}

pub use capture::{CaptureMessenger, OutboundMessage};
pub use telegram::TelegramMessenger;
