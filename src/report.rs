use std::collections::BTreeMap;

use crate::metrics::MetricsStore;
use crate::types::provider::{CredentialHealth, HealthStatus};
use crate::types::report::{HealthRating, HealthReport, StatusSummary};

/// Rounded share of `valid` records; an empty set scores 100.
fn valid_percentage(keys: &[CredentialHealth]) -> u32 {
    if keys.is_empty() {
        return 100;
    }
    let total = keys.len() as u32;
    let valid = keys.iter().filter(|k| k.status == HealthStatus::Valid).count() as u32;
    (valid * 100 + total / 2) / total
}

pub fn build_report(keys: Vec<CredentialHealth>) -> HealthReport {
    let valid_keys = keys.iter().filter(|k| k.status == HealthStatus::Valid).count() as u32;
    let problem_keys = keys.iter().filter(|k| k.status.is_problem()).count() as u32;
    HealthReport {
        overall_score: valid_percentage(&keys),
        total_keys: keys.len() as u32,
        valid_keys,
        problem_keys,
        last_update: keys.iter().filter_map(|k| k.last_outcome_at).max(),
        keys,
    }
}

pub fn build_summary(keys: &[CredentialHealth]) -> StatusSummary {
    let mut breakdown: BTreeMap<String, u32> = HealthStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for key in keys {
        *breakdown.entry(key.status.as_str().to_string()).or_default() += 1;
    }
    let needs_attention = keys
        .iter()
        .filter(|k| {
            matches!(
                k.status,
                HealthStatus::Invalid | HealthStatus::NetworkError | HealthStatus::UnknownError
            )
        })
        .count() as u32;
    let health_percentage = valid_percentage(keys);
    StatusSummary {
        total: keys.len() as u32,
        breakdown,
        needs_attention,
        health_percentage,
        rating: HealthRating::from_percentage(health_percentage),
    }
}

pub fn health_report(metrics: &MetricsStore) -> Result<HealthReport, String> {
    Ok(build_report(metrics.list_all()?))
}

pub fn status_summary(metrics: &MetricsStore) -> Result<StatusSummary, String> {
    Ok(build_summary(&metrics.list_all()?))
}
