//! Maps a raw provider failure onto the [`ErrorKind`] taxonomy.
//!
//! Rules are data: [`ClassifierRules`] can be loaded from JSON so new provider
//! error formats only need a config change. Evaluation order is fixed:
//! rate limit, invalid credential, server error status, transport failure,
//! then `unknown_error`.

use serde::{Deserialize, Serialize};

use crate::types::provider::ErrorKind;

/// What the engine knows about a failed attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawError {
    pub http_status: Option<u16>,
    pub message: Option<String>,
    /// No HTTP response arrived (deadline hit or connection failure).
    pub timed_out: bool,
}

impl RawError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            http_status: Some(status),
            message: Some(message.into()),
            timed_out: false,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            message: Some(message.into()),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            http_status: None,
            message: Some(message.into()),
            timed_out: true,
        }
    }

    /// Human readable form stored as `last_error`.
    pub fn describe(&self) -> String {
        match (self.http_status, self.message.as_deref()) {
            (Some(status), Some(msg)) => format!("{} {}", status, msg),
            (Some(status), None) => status.to_string(),
            (None, Some(msg)) => msg.to_string(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// Status codes and message fragments for one error kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRule {
    #[serde(default)]
    pub statuses: Vec<u16>,
    /// Matched case-insensitively as substrings.
    #[serde(default)]
    pub fragments: Vec<String>,
}

impl MatchRule {
    fn matches(&self, status: Option<u16>, message_lower: Option<&str>) -> bool {
        if let Some(status) = status {
            if self.statuses.contains(&status) {
                return true;
            }
        }
        match message_lower {
            Some(msg) => self
                .fragments
                .iter()
                .any(|f| msg.contains(&f.to_lowercase())),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierRules {
    pub rate_limited: MatchRule,
    pub invalid: MatchRule,
    /// Inclusive lower and exclusive upper bound of server error statuses.
    pub server_error_range: (u16, u16),
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            rate_limited: MatchRule {
                statuses: vec![429],
                fragments: vec!["rate limit".to_string()],
            },
            invalid: MatchRule {
                statuses: vec![401, 403],
                fragments: vec!["invalid".to_string(), "unauthorized".to_string()],
            },
            server_error_range: (500, 600),
        }
    }
}

impl ClassifierRules {
    /// First match wins. Never fails: an empty error is `unknown_error`.
    pub fn classify(&self, raw: &RawError) -> ErrorKind {
        let lowered = raw.message.as_ref().map(|m| m.to_lowercase());
        let msg = lowered.as_deref();

        if self.rate_limited.matches(raw.http_status, msg) {
            return ErrorKind::RateLimited;
        }
        if self.invalid.matches(raw.http_status, msg) {
            return ErrorKind::Invalid;
        }
        if let Some(status) = raw.http_status {
            let (lo, hi) = self.server_error_range;
            if status >= lo && status < hi {
                return ErrorKind::NetworkError;
            }
        }
        if raw.timed_out {
            return ErrorKind::NetworkError;
        }
        ErrorKind::UnknownError
    }
}

/// Classify with the built-in rule table.
pub fn classify(raw: &RawError) -> ErrorKind {
    ClassifierRules::default().classify(raw)
}
