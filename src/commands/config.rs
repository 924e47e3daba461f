use crate::config::{self, AlertChannelConfig};
use crate::Monitor;

/// Current alert configuration with webhook URLs masked.
pub fn config_get(monitor: &Monitor) -> AlertChannelConfig {
    monitor.alerts().config().get().masked()
}

/// Merge `patch_json` into the stored file, test any new or changed webhooks,
/// then persist and apply. Nothing is written if a webhook test fails.
pub async fn config_update(monitor: &Monitor, patch_json: &str) -> Result<AlertChannelConfig, String> {
    let path = config::alert_config_path(monitor.data_dir());
    let stored = config::load_alert_config(&path)?;
    let merged = config::merge_alert_config(&stored, patch_json)?;

    let previous = stored.webhooks();
    let changed: Vec<(&str, &str)> = merged
        .webhooks()
        .into_iter()
        .filter(|hook| !previous.contains(hook))
        .collect();
    monitor.alerts().dispatcher().test_webhooks(&changed).await?;

    config::save_alert_config(&path, &merged)?;
    let mut live = merged.clone();
    live.apply_env_overrides(|k| std::env::var(k).ok());
    live.validate()?;
    monitor.alerts().config().replace(live);
    tracing::info!("Alert configuration updated");
    Ok(merged.masked())
}
