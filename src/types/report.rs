use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::provider::CredentialHealth;

/// Dashboard view of every tracked credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub keys: Vec<CredentialHealth>,
    /// Percentage of keys whose status is `valid`; 100 when nothing is tracked.
    pub overall_score: u32,
    pub total_keys: u32,
    pub valid_keys: u32,
    pub problem_keys: u32,
    pub last_update: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthRating {
    Excellent,
    Good,
    Fair,
    NeedsAttention,
}

impl HealthRating {
    pub fn from_percentage(pct: u32) -> Self {
        match pct {
            90.. => HealthRating::Excellent,
            75..=89 => HealthRating::Good,
            50..=74 => HealthRating::Fair,
            _ => HealthRating::NeedsAttention,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total: u32,
    /// Keyed by the snake_case status name.
    pub breakdown: BTreeMap<String, u32>,
    pub needs_attention: u32,
    pub health_percentage: u32,
    pub rating: HealthRating,
}
