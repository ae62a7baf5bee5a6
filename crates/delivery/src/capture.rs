//! In-memory messenger that captures outbound messages for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use retention_core::types::ContentType;

use crate::Messenger;

/// One captured outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub content_type: ContentType,
    pub payload: String,
    pub caption: Option<String>,
}

/// Messenger double recording every send. Flip `fail_all` to exercise
/// delivery-failure paths.
#[derive(Default)]
pub struct CaptureMessenger {
    sent: Mutex<Vec<OutboundMessage>>,
    fail_all: AtomicBool,
}

impl CaptureMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let m = Self::default();
        m.fail_all.store(true, Ordering::SeqCst);
        m
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("capture mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().expect("capture mutex poisoned").len()
    }

    fn record(
        &self,
        chat_id: &str,
        content_type: ContentType,
        payload: &str,
        caption: Option<&str>,
    ) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return false;
        }
        self.sent
            .lock()
            .expect("capture mutex poisoned")
            .push(OutboundMessage {
                chat_id: chat_id.to_string(),
                content_type,
                payload: payload.to_string(),
                caption: caption.map(str::to_string),
            });
        true
    }
}

#[async_trait]
impl Messenger for CaptureMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> bool {
        self.record(chat_id, ContentType::Text, text, None)
    }

    async fn send_photo(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool {
        self.record(chat_id, ContentType::Photo, url, caption)
    }

    async fn send_audio(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool {
        self.record(chat_id, ContentType::Audio, url, caption)
    }

    async fn send_video(&self, chat_id: &str, url: &str, caption: Option<&str>) -> bool {
        self.record(chat_id, ContentType::Video, url, caption)
    }
}
