//! Delivery targets

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::message::OutgoingMessage;
use crate::error::{Error, Result};
use crate::retrieval::{AuthMode, ResilientClient};

/// Telegram's limit for a photo caption
const MAX_CAPTION_LEN: usize = 1024;

/// Somewhere a formatted message can be delivered
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &OutgoingMessage) -> Result<()>;
}

/// Writes messages to the log
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        info!(
            sink = %self.name,
            target = %message.target,
            buttons = message.buttons.len(),
            "{}",
            message.text
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API sink
pub struct TelegramSink {
    name: String,
    client: Arc<ResilientClient>,
    api_url: String,
    bot_token: String,
    cancel: CancellationToken,
}

impl TelegramSink {
    pub fn new(
        name: &str,
        client: Arc<ResilientClient>,
        api_url: &str,
        bot_token: &str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.to_string(),
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            cancel,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.bot_token, method)
    }

    /// Never let the bot token reach logs or error text
    fn mask(&self, text: &str) -> String {
        if self.bot_token.is_empty() {
            return text.to_string();
        }
        text.replace(&self.bot_token, "***")
    }
}

/// `sendPhoto` when there is an image, `sendMessage` otherwise
fn build_payload(message: &OutgoingMessage) -> (&'static str, Value) {
    let mut payload = match &message.media_url {
        Some(photo) => json!({
            "chat_id": message.target,
            "photo": photo,
            "caption": clip(&message.text, MAX_CAPTION_LEN),
            "parse_mode": "HTML",
        }),
        None => json!({
            "chat_id": message.target,
            "text": message.text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        }),
    };

    if !message.buttons.is_empty() {
        let row: Vec<Value> = message
            .buttons
            .iter()
            .map(|b| json!({ "text": b.label, "url": b.url }))
            .collect();
        payload["reply_markup"] = json!({ "inline_keyboard": [row] });
    }

    let method = if message.media_url.is_some() {
        "sendPhoto"
    } else {
        "sendMessage"
    };
    (method, payload)
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max - 1).collect();
    clipped.push('…');
    clipped
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let (method, payload) = build_payload(message);

        let reply: TelegramReply = self
            .client
            .post_json(
                &self.method_url(method),
                &payload,
                AuthMode::Anonymous,
                &self.cancel,
            )
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::Notification(format!(
                    "{}: {}",
                    self.name,
                    self.mask(&other.to_string())
                )),
            })?;

        if !reply.ok {
            let reason = reply.description.unwrap_or_else(|| "not ok".to_string());
            return Err(Error::Notification(format!(
                "{}: {}",
                self.name,
                self.mask(&reason)
            )));
        }

        debug!(sink = %self.name, method, "Telegram message sent");
        Ok(())
    }
}
