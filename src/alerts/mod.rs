//! Escalation of sustained credential failures.
//!
//! The policy runs after every recorded failure. Once a credential's streak
//! reaches the configured threshold every further failure re-alerts with the
//! updated count, until a success resets the streak in the metrics store.

pub mod audit;
pub mod channels;

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::SharedAlertConfig;
use crate::types::alert::{AlertEvent, AlertLevel};
use crate::types::now_millis;
use crate::types::provider::{CredentialHealth, ErrorKind};

use self::audit::AlertAuditLog;
use self::channels::Dispatcher;

pub const IMPACT_HINT: &str = "Agent functionality may be degraded or unavailable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Healthy,
    Degrading,
    Escalated,
}

impl AlertPhase {
    pub fn of(consecutive_failures: u32, threshold: u32) -> Self {
        if consecutive_failures == 0 {
            AlertPhase::Healthy
        } else if consecutive_failures < threshold {
            AlertPhase::Degrading
        } else {
            AlertPhase::Escalated
        }
    }
}

pub fn action_hint(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimited => "Reduce request rate or upgrade plan.",
        ErrorKind::Invalid => "Replace or rotate the credential.",
        ErrorKind::NetworkError => "Check upstream provider status.",
        ErrorKind::UnknownError => "Credential may need to be replaced or the service may be down.",
    }
}

pub struct AlertPolicy {
    config: SharedAlertConfig,
    dispatcher: Dispatcher,
    audit: Arc<AlertAuditLog>,
}

impl AlertPolicy {
    pub fn new(config: SharedAlertConfig, dispatcher: Dispatcher, audit: AlertAuditLog) -> Self {
        Self {
            config,
            dispatcher,
            audit: Arc::new(audit),
        }
    }

    pub fn config(&self) -> &SharedAlertConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn audit(&self) -> &AlertAuditLog {
        &self.audit
    }

    /// Inspect the post-failure health of one credential and escalate if the
    /// streak is at or past the threshold. Returns the event that was sent.
    ///
    /// Delivery and audit failures are logged only; nothing here can fail the
    /// invocation that triggered it.
    pub async fn on_failure(&self, health: &CredentialHealth, kind: ErrorKind) -> Option<AlertEvent> {
        let config = self.config.get();
        let threshold = config.consecutive_failure_threshold;

        match AlertPhase::of(health.consecutive_failures, threshold) {
            AlertPhase::Healthy => return None,
            AlertPhase::Degrading => {
                if health.consecutive_failures == 1 {
                    warn!(
                        caller = %health.caller_id,
                        provider = %health.provider_name,
                        kind = %kind,
                        "Credential started failing"
                    );
                }
                return None;
            }
            AlertPhase::Escalated => {}
        }

        let event = AlertEvent {
            level: AlertLevel::Executive,
            caller_id: health.caller_id.clone(),
            provider_name: health.provider_name.clone(),
            consecutive_failures: health.consecutive_failures,
            error_kind: kind,
            last_error: health.last_error.clone(),
            timestamp: now_millis(),
            action_hint: action_hint(kind).to_string(),
            impact_hint: IMPACT_HINT.to_string(),
        };
        error!(
            caller = %event.caller_id,
            provider = %event.provider_name,
            failures = event.consecutive_failures,
            threshold,
            "Credential escalated"
        );

        let deliveries = self.dispatcher.dispatch(&config, &event.payload()).await;

        let audit = self.audit.clone();
        let record = event.clone();
        let capacity = config.audit_capacity;
        let appended =
            tokio::task::spawn_blocking(move || audit.append(&record, &deliveries, capacity)).await;
        match appended {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to append alert audit entry"),
            Err(e) => warn!(error = %e, "Alert audit task panicked"),
        }

        Some(event)
    }
}
