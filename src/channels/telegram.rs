//! Telegram channel — long-polls the Bot API for updates.
//!
//! Authorization is not decided here: every text message is forwarded with
//! the numeric user id as `sender_id` and the username in metadata, and the
//! pipeline's allow-list makes the call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{Channel, MessageStream};
use crate::error::ChannelError;
use crate::pipeline::InboundMessage;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Back-off after the Bot API rejected the token.
const POLL_AUTH_BACKOFF: Duration = Duration::from_secs(60);

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point at a different Bot API server (local bot API, test doubles).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        method_url(&self.api_base, &self.bot_token, method)
    }

    fn send_error(reason: impl Into<String>) -> ChannelError {
        ChannelError::SendFailed {
            name: "telegram".into(),
            reason: reason.into(),
        }
    }

    /// Send a text message, trying Markdown first with plain text fallback.
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| Self::send_error(e.to_string()))?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        tracing::warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| Self::send_error(e.to_string()))?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(Self::send_error(format!(
                "sendMessage failed (markdown: {}, plain: {})",
                markdown_status, plain_err
            )));
        }

        Ok(())
    }
}

// ── getUpdates replies ──────────────────────────────────────────────

/// What a getUpdates reply means for the poll loop.
#[derive(Debug, PartialEq)]
enum PollReply<'a> {
    Updates(&'a [serde_json::Value]),
    Failed {
        code: Option<i64>,
        description: String,
    },
}

fn classify_poll_reply(data: &serde_json::Value) -> PollReply<'_> {
    let ok = data.get("ok").and_then(serde_json::Value::as_bool) == Some(true);
    match data.get("result").and_then(serde_json::Value::as_array) {
        Some(results) if ok => PollReply::Updates(results),
        _ => PollReply::Failed {
            code: data.get("error_code").and_then(serde_json::Value::as_i64),
            description: data
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("reply without updates")
                .to_string(),
        },
    }
}

/// A rejected token will not fix itself quickly; wait longer.
fn failure_backoff(code: Option<i64>) -> Duration {
    match code {
        Some(401) | Some(404) => POLL_AUTH_BACKOFF,
        _ => POLL_ERROR_BACKOFF,
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {}", e.without_url());
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {}", e.without_url());
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let results = match classify_poll_reply(&data) {
                    PollReply::Updates(results) => results,
                    PollReply::Failed { code, description } => {
                        tracing::warn!(code = ?code, "Telegram getUpdates failed: {}", description);
                        tokio::time::sleep(failure_backoff(code)).await;
                        continue;
                    }
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(&self, msg: &InboundMessage, text: &str) -> Result<(), ChannelError> {
        self.deliver(&msg.metadata, text).await
    }

    async fn deliver(&self, metadata: &serde_json::Value, text: &str) -> Result<(), ChannelError> {
        let chat_id = chat_id(metadata)
            .ok_or_else(|| Self::send_error("No chat_id in message metadata"))?;
        self.send_message(chat_id, text).await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.without_url().to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn method_url(base: &str, token: &SecretString, method: &str) -> String {
    format!("{base}/bot{}/{method}", token.expose_secret())
}

fn chat_id(metadata: &serde_json::Value) -> Option<&str> {
    metadata.get("chat_id").and_then(serde_json::Value::as_str)
}

/// Convert one getUpdates entry into an inbound message. Non-text updates
/// and updates without a sender are skipped.
fn parse_update(update: &serde_json::Value) -> Option<InboundMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(serde_json::Value::as_str)?;
    let from = message.get("from")?;

    let user_id = from.get("id").and_then(serde_json::Value::as_i64)?;
    let username = from.get("username").and_then(serde_json::Value::as_str);
    let first_name = from.get("first_name").and_then(serde_json::Value::as_str);

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();

    let mut incoming = InboundMessage::new("telegram", user_id.to_string(), text)
        .with_metadata(serde_json::json!({
            "chat_id": chat_id,
            "username": username.unwrap_or_default(),
        }));

    if let Some(id) = message.get("message_id").and_then(serde_json::Value::as_i64) {
        incoming = incoming.with_id(format!("telegram-{chat_id}-{id}"));
    }
    if let Some(sent_at) = message
        .get("date")
        .and_then(serde_json::Value::as_i64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    {
        incoming = incoming.with_received_at(sent_at);
    }
    if let Some(name) = first_name.or(username) {
        incoming = incoming.with_sender_name(name);
    }
    Some(incoming)
}

/// Largest char boundary in `text` at or below `index`.
fn floor_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let hard_cut = floor_boundary(remaining, max_len);
        let chunk = &remaining[..hard_cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(hard_cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = match (split_at, hard_cut) {
            (0, 0) => remaining.chars().next().map_or(1, char::len_utf8),
            (0, cut) => cut,
            (at, _) => at,
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
