use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Failure taxonomy produced by the error classifier for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Invalid,
    RateLimited,
    NetworkError,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Invalid => "invalid",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Valid,
    Invalid,
    RateLimited,
    NetworkError,
    UnknownError,
    NotVerified,
}

impl HealthStatus {
    pub const ALL: [HealthStatus; 6] = [
        HealthStatus::Valid,
        HealthStatus::Invalid,
        HealthStatus::RateLimited,
        HealthStatus::NetworkError,
        HealthStatus::UnknownError,
        HealthStatus::NotVerified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Valid => "valid",
            HealthStatus::Invalid => "invalid",
            HealthStatus::RateLimited => "rate_limited",
            HealthStatus::NetworkError => "network_error",
            HealthStatus::UnknownError => "unknown_error",
            HealthStatus::NotVerified => "not_verified",
        }
    }

    /// Anything other than `valid` or `not_verified` counts as a problem key.
    pub fn is_problem(&self) -> bool {
        !matches!(self, HealthStatus::Valid | HealthStatus::NotVerified)
    }
}

impl From<ErrorKind> for HealthStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Invalid => HealthStatus::Invalid,
            ErrorKind::RateLimited => HealthStatus::RateLimited,
            ErrorKind::NetworkError => HealthStatus::NetworkError,
            ErrorKind::UnknownError => HealthStatus::UnknownError,
        }
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HealthStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown health status: '{}'", s))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one provider attempt, consumed immediately by the metrics store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
    pub success: bool,
    pub latency_ms: u64,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    pub timestamp: u64,
}

impl CallOutcome {
    pub fn success(latency_ms: u64, timestamp: u64) -> Self {
        Self {
            success: true,
            latency_ms,
            error_kind: None,
            error: None,
            timestamp,
        }
    }

    pub fn failure(latency_ms: u64, kind: ErrorKind, error: impl Into<String>, timestamp: u64) -> Self {
        Self {
            success: false,
            latency_ms,
            error_kind: Some(kind),
            error: Some(error.into()),
            timestamp,
        }
    }
}

/// Durable aggregate for one `(caller_id, provider_name)` credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHealth {
    pub caller_id: String,
    pub provider_name: String,
    pub total_calls: u64,
    pub success_count: u64,
    pub average_latency_ms: f64,
    pub consecutive_failures: u32,
    pub last_outcome_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub last_error: Option<String>,
    pub status: HealthStatus,
    /// Fingerprint of the secret that was last verified, never the secret itself.
    #[serde(default)]
    pub key_hash: Option<String>,
    #[serde(default)]
    pub last_verified_at: Option<u64>,
}

impl CredentialHealth {
    /// Fraction of successful calls, `None` before the first recorded call.
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_calls == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.total_calls as f64)
        }
    }
}
