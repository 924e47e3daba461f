use crate::report;
use crate::types::provider::CredentialHealth;
use crate::types::report::{HealthReport, StatusSummary};
use crate::verify::VerifySummary;
use crate::Monitor;

pub fn health_report(monitor: &Monitor) -> Result<HealthReport, String> {
    report::health_report(monitor.metrics())
}

pub fn health_summary(monitor: &Monitor) -> Result<StatusSummary, String> {
    report::status_summary(monitor.metrics())
}

pub fn health_list(monitor: &Monitor, caller_id: &str) -> Result<Vec<CredentialHealth>, String> {
    monitor.metrics().list_health(caller_id)
}

/// Clear a credential's failure streak after manual remediation.
pub fn health_reset(monitor: &Monitor, caller_id: &str, provider_name: &str) -> Result<(), String> {
    if monitor.metrics().force_reset(caller_id, provider_name)? {
        Ok(())
    } else {
        Err(format!("No health record for {}/{}", caller_id, provider_name))
    }
}

/// Verify the keys of `callers`, or of every caller with a health record when
/// none are given.
pub async fn health_verify(
    monitor: &Monitor,
    callers: &[String],
    force: bool,
) -> Result<VerifySummary, String> {
    let callers = if callers.is_empty() {
        let mut known: Vec<String> = monitor
            .metrics()
            .list_all()?
            .into_iter()
            .map(|h| h.caller_id)
            .collect();
        known.dedup();
        known
    } else {
        callers.to_vec()
    };

    let mut summary = VerifySummary::default();
    for caller_id in &callers {
        for key in monitor.engine().verify(caller_id, force).await?.keys {
            summary.push(key);
        }
    }
    tracing::info!(
        verified = summary.verified,
        skipped = summary.skipped,
        "{}",
        summary.message()
    );
    Ok(summary)
}
