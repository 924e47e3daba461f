use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AlertChannelConfig;
use crate::types::alert::{AlertPayload, DeliveryRecord};

/// Per-send deadline so a hung webhook cannot stall the caller's fallback.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, payload: &AlertPayload) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    Slack,
    Discord,
    Json,
}

impl WebhookFormat {
    pub fn for_channel(name: &str) -> Self {
        match name {
            "slack" => WebhookFormat::Slack,
            "discord" => WebhookFormat::Discord,
            _ => WebhookFormat::Json,
        }
    }

    pub fn render(&self, payload: &AlertPayload) -> Value {
        match self {
            WebhookFormat::Slack => json!({
                "text": payload.title,
                "blocks": [
                    {
                        "type": "header",
                        "text": { "type": "plain_text", "text": payload.title }
                    },
                    {
                        "type": "section",
                        "text": {
                            "type": "mrkdwn",
                            "text": format!(
                                "*Message:* {}\n*Error:* {}\n*Action Required:* {}\n*Impact:* {}",
                                payload.message, payload.error_detail, payload.action_hint, payload.impact_hint
                            )
                        }
                    }
                ]
            }),
            WebhookFormat::Discord => json!({
                "content": payload.title,
                "embeds": [{
                    "title": payload.title,
                    "description": payload.message,
                    "color": 0xff0000,
                    "fields": [
                        { "name": "Error", "value": payload.error_detail, "inline": false },
                        { "name": "Action Required", "value": payload.action_hint, "inline": false },
                        { "name": "Impact", "value": payload.impact_hint, "inline": false }
                    ],
                    "timestamp": iso_timestamp(payload.timestamp)
                }]
            }),
            WebhookFormat::Json => serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }
}

/// RFC 3339 UTC rendering of epoch millis (Discord rejects bare numbers).
fn iso_timestamp(millis: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct WebhookChannel {
    name: String,
    url: String,
    format: WebhookFormat,
    http: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: &str, url: &str, http: reqwest::Client) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            format: WebhookFormat::for_channel(name),
            http,
        }
    }

    async fn post(&self, body: &Value) -> Result<(), String> {
        let response = self
            .http
            .post(&self.url)
            .timeout(SEND_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {}", response.status()))
        }
    }

    /// Sends a harmless test message so a bad URL is caught at config time.
    pub async fn send_test(&self) -> Result<(), String> {
        let body = match self.format {
            WebhookFormat::Slack => json!({
                "text": "Provider alert configuration test",
                "blocks": [{
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": "*Test Message*\nThis webhook will receive alerts when provider credentials fail repeatedly."
                    }
                }]
            }),
            WebhookFormat::Discord => json!({
                "content": "**Provider alert configuration test**",
                "embeds": [{
                    "title": "Test Message",
                    "description": "This webhook will receive alerts when provider credentials fail repeatedly.",
                    "color": 0x00ff00
                }]
            }),
            WebhookFormat::Json => json!({ "test": true }),
        };
        self.post(&body).await
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), String> {
        self.post(&self.format.render(payload)).await
    }
}

/// Fans one payload out to every channel concurrently.
pub struct Dispatcher {
    http: reqwest::Client,
    extra: Vec<Arc<dyn AlertChannel>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            extra: Vec::new(),
        }
    }

    /// Register a channel that is not described by the config file.
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.extra.push(channel);
        self
    }

    /// Channels are rebuilt from the current config on every dispatch so a
    /// hot-reloaded file takes effect on the next alert.
    pub fn channels(&self, config: &AlertChannelConfig) -> Vec<Arc<dyn AlertChannel>> {
        let mut channels: Vec<Arc<dyn AlertChannel>> = config
            .webhooks()
            .into_iter()
            .map(|(name, url)| {
                Arc::new(WebhookChannel::new(name, url, self.http.clone())) as Arc<dyn AlertChannel>
            })
            .collect();
        channels.extend(self.extra.iter().cloned());
        channels
    }

    /// Every send is independent: one failing channel never blocks another,
    /// and failures come back as records, not errors.
    pub async fn dispatch(
        &self,
        config: &AlertChannelConfig,
        payload: &AlertPayload,
    ) -> Vec<DeliveryRecord> {
        let channels = self.channels(config);
        let sends = channels.iter().map(|channel| async move {
            let result = channel.send(payload).await;
            match &result {
                Ok(()) => info!(channel = channel.name(), "Alert delivered"),
                Err(e) => warn!(channel = channel.name(), error = %e, "Alert delivery failed"),
            }
            DeliveryRecord {
                channel: channel.name().to_string(),
                delivered: result.is_ok(),
                error: result.err(),
            }
        });
        join_all(sends).await
    }

    /// Send a test message to each Slack or Discord webhook in `hooks`.
    pub async fn test_webhooks(&self, hooks: &[(&str, &str)]) -> Result<(), String> {
        for &(name, url) in hooks {
            if WebhookFormat::for_channel(name) == WebhookFormat::Json {
                continue;
            }
            WebhookChannel::new(name, url, self.http.clone())
                .send_test()
                .await
                .map_err(|e| format!("{} webhook test failed: {}", name, e))?;
        }
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
