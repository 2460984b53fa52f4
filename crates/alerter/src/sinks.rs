use crate::error::AlerterError;
use async_trait::async_trait;
use configuration::{DiscordConfig, SinkConfig, TelegramConfig};
use core_types::Alert;
use events::WsMessage;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const SINK_TIMEOUT: Duration = Duration::from_secs(5);

/// A destination for fired alerts. Delivery is attempted once; failures are
/// reported to the caller and never retried here.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, alert: &Alert) -> Result<(), AlerterError>;
}

/// Builds every sink the configuration has credentials for.
pub fn sinks_from_config(
    config: &SinkConfig,
    broadcast: Option<broadcast::Sender<WsMessage>>,
) -> Vec<Arc<dyn AlertSink>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    if let Some(sink) = WebhookSink::new(&config.discord) {
        sinks.push(Arc::new(sink));
    }
    if let Some(sink) = TelegramSink::new(&config.telegram) {
        sinks.push(Arc::new(sink));
    }
    if config.log {
        sinks.push(Arc::new(LogSink));
    }
    if let Some(tx) = broadcast {
        sinks.push(Arc::new(BroadcastSink::new(tx)));
    }
    sinks
}

fn http_client() -> Client {
    Client::builder()
        .timeout(SINK_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

// --- Discord-style webhook ---

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    content: String,
    username: &'a str,
}

pub struct WebhookSink {
    client: Client,
    url: String,
    username: String,
}

impl WebhookSink {
    /// Returns `None` when no webhook URL is configured.
    pub fn new(config: &DiscordConfig) -> Option<Self> {
        let url = config.webhook_url.as_deref().filter(|u| !u.trim().is_empty())?;
        Some(Self {
            client: http_client(),
            url: url.to_string(),
            username: config.username.clone(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlerterError> {
        let payload = WebhookPayload {
            content: format!("```\n{}\n```", alert.message),
            username: &self.username,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AlerterError::ApiError {
                sink: self.name(),
                message: format!("{}: {}", status, body),
            });
        }
        Ok(())
    }
}

// --- Telegram ---

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

pub struct TelegramSink {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    /// Returns `None` if the token or chat_id is missing, which disables the sink.
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        if config.token.is_empty() || config.chat_id.is_empty() {
            tracing::debug!("Telegram sink is not configured (missing token or chat_id).");
            return None;
        }
        Some(Self {
            client: http_client(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }

    async fn send_message(&self, text: &str) -> Result<(), AlerterError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text,
            parse_mode: "MarkdownV2",
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError {
                sink: self.name(),
                message: error_text,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlerterError> {
        let mut lines = alert.message.lines();
        let title = lines.next().unwrap_or_default();
        let body: Vec<&str> = lines.collect();
        let text = format!(
            "*{}*\n{}",
            escape_markdown(title),
            escape_markdown(&body.join("\n"))
        );
        self.send_message(&text).await
    }
}

/// Escapes characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = r"\_*[]()~`>#+-=|{}.!";
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if special_chars.contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// --- Log ---

/// Writes every alert to the application log.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlerterError> {
        tracing::info!(
            symbol = %alert.symbol,
            kind = %alert.kind,
            sequence = alert.sequence,
            "\n{}",
            alert.message
        );
        Ok(())
    }
}

// --- Dashboard broadcast ---

/// Publishes alerts to dashboard subscribers. Having no subscriber is not a failure.
pub struct BroadcastSink {
    tx: broadcast::Sender<WsMessage>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<WsMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AlertSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), AlerterError> {
        if self.tx.send(WsMessage::Alert(alert.clone())).is_err() {
            tracing::trace!("No dashboard subscriber for alert {}", alert.sequence);
        }
        Ok(())
    }
}
