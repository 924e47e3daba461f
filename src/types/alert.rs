use serde::{Deserialize, Serialize};

use super::provider::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Executive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub caller_id: String,
    pub provider_name: String,
    pub consecutive_failures: u32,
    pub error_kind: ErrorKind,
    pub last_error: Option<String>,
    pub timestamp: u64,
    pub action_hint: String,
    pub impact_hint: String,
}

impl AlertEvent {
    /// Structured form every channel adapter starts from.
    pub fn payload(&self) -> AlertPayload {
        AlertPayload {
            title: "Critical API Failure".to_string(),
            message: format!(
                "Credential {}/{} has failed {} consecutive times.",
                self.caller_id, self.provider_name, self.consecutive_failures
            ),
            error_detail: self
                .last_error
                .clone()
                .unwrap_or_else(|| self.error_kind.to_string()),
            action_hint: self.action_hint.clone(),
            impact_hint: self.impact_hint.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub title: String,
    pub message: String,
    pub error_detail: String,
    pub action_hint: String,
    pub impact_hint: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub channel: String,
    pub delivered: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertAuditEntry {
    pub id: i64,
    pub event: AlertEvent,
    pub deliveries: Vec<DeliveryRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub total: u64,
    pub last_24_hours: u64,
    pub last_7_days: u64,
}
