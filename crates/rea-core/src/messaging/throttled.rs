use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::port::{MessagingCapabilities, MessagingPort},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two sends (bot-wide flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),     // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

/// Next free send time, bot-wide and per chat.
///
/// A chat whose next slot has already passed constrains nothing, so it is
/// dropped from the table.
#[derive(Debug)]
struct SendSlots {
    global: Instant,
    per_chat: HashMap<ChatId, Instant>,
}

impl SendSlots {
    fn new(now: Instant) -> Self {
        Self {
            global: now,
            per_chat: HashMap::new(),
        }
    }

    /// Claim the earliest instant at which `chat_id` may be sent to.
    fn reserve(&mut self, chat_id: ChatId, cfg: &ThrottleConfig, now: Instant) -> Instant {
        self.per_chat.retain(|_, next| *next > now);

        let chat_next = self.per_chat.get(&chat_id).copied().unwrap_or(now);
        let at = now.max(self.global).max(chat_next);
        self.global = at + cfg.global_min_interval;
        self.per_chat.insert(chat_id, at + cfg.per_chat_min_interval);
        at
    }
}

/// `MessagingPort` decorator that spaces out sends.
///
/// A burst of matches for one owner is delivered at roughly one message per
/// second instead of tripping Telegram's 429 flood control.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    slots: Mutex<SendSlots>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            slots: Mutex::new(SendSlots::new(Instant::now())),
        }
    }

    async fn wait_for_slot(&self, chat_id: ChatId) {
        let at = {
            let mut slots = self.slots.lock().await;
            slots.reserve(chat_id, &self.cfg, Instant::now())
        };
        sleep_until(at).await;
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_for_slot(chat_id).await;
        self.inner.send_html(chat_id, html).await
    }
}
