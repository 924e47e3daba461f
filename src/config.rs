//! Operator configuration: alert channels and the provider catalog.
//!
//! Both live as JSON files in the data dir. The alert config is shared behind
//! an `RwLock` so the file watcher can swap it while requests are in flight.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classifier::ClassifierRules;
use crate::types::config::ProviderCatalog;

pub const DEFAULT_THRESHOLD: u32 = 3;
pub const MIN_THRESHOLD: u32 = 1;
pub const MAX_THRESHOLD: u32 = 5;
pub const DEFAULT_AUDIT_CAPACITY: u32 = 100;

const MASKED: &str = "***CONFIGURED***";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_webhook: Option<String>,
    /// Receives the structured alert payload as plain JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_endpoint: Option<String>,
    #[serde(default = "default_threshold", alias = "execNotificationThreshold")]
    pub consecutive_failure_threshold: u32,
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: u32,
}

fn default_threshold() -> u32 {
    DEFAULT_THRESHOLD
}

fn default_audit_capacity() -> u32 {
    DEFAULT_AUDIT_CAPACITY
}

impl Default for AlertChannelConfig {
    fn default() -> Self {
        Self {
            slack_webhook: None,
            discord_webhook: None,
            email_endpoint: None,
            consecutive_failure_threshold: DEFAULT_THRESHOLD,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

impl AlertChannelConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&self.consecutive_failure_threshold) {
            return Err(format!(
                "consecutiveFailureThreshold must be between {} and {}",
                MIN_THRESHOLD, MAX_THRESHOLD
            ));
        }
        if self.audit_capacity == 0 {
            return Err("auditCapacity must be at least 1".to_string());
        }
        for url in self.webhooks().into_iter().map(|(_, url)| url) {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(format!("Webhook URL must be http(s): '{}'", url));
            }
        }
        Ok(())
    }

    /// Configured channels as `(name, url)` pairs, blank entries skipped.
    pub fn webhooks(&self) -> Vec<(&'static str, &str)> {
        [
            ("slack", self.slack_webhook.as_deref()),
            ("discord", self.discord_webhook.as_deref()),
            ("email", self.email_endpoint.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, url)| url.filter(|u| !u.trim().is_empty()).map(|u| (name, u)))
        .collect()
    }

    /// Copy safe to show in a UI: webhook URLs are replaced by a marker.
    pub fn masked(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| MASKED.to_string());
        Self {
            slack_webhook: mask(&self.slack_webhook),
            discord_webhook: mask(&self.discord_webhook),
            email_endpoint: mask(&self.email_endpoint),
            ..self.clone()
        }
    }

    /// Environment wins over the file, matching how secrets are resolved.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PROVWATCH_SLACK_WEBHOOK") {
            self.slack_webhook = Some(v);
        }
        if let Some(v) = lookup("PROVWATCH_DISCORD_WEBHOOK") {
            self.discord_webhook = Some(v);
        }
        if let Some(v) = lookup("PROVWATCH_EMAIL_ENDPOINT") {
            self.email_endpoint = Some(v);
        }
        if let Some(v) = lookup("PROVWATCH_ALERT_THRESHOLD") {
            match v.parse() {
                Ok(n) => self.consecutive_failure_threshold = n,
                Err(_) => warn!(value = %v, "Ignoring non-numeric PROVWATCH_ALERT_THRESHOLD"),
            }
        }
    }
}

pub fn alert_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("alert-config.json")
}

pub fn provider_catalog_path(data_dir: &Path) -> PathBuf {
    data_dir.join("providers.json")
}

pub fn classifier_rules_path(data_dir: &Path) -> PathBuf {
    data_dir.join("classifier-rules.json")
}

/// Missing file means defaults; an unreadable or invalid file is an error.
pub fn load_alert_config(path: &Path) -> Result<AlertChannelConfig, String> {
    let config = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str::<AlertChannelConfig>(&text)
            .map_err(|e| format!("Invalid alert config {}: {}", path.display(), e))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Using default alert configuration");
            AlertChannelConfig::default()
        }
        Err(e) => return Err(format!("Failed to read {}: {}", path.display(), e)),
    };
    config.validate()?;
    Ok(config)
}

pub fn save_alert_config(path: &Path, config: &AlertChannelConfig) -> Result<(), String> {
    config.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| e.to_string())?;
    // Write-then-rename so the watcher never sees a half-written file.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| e.to_string())?;
    std::fs::rename(&tmp, path).map_err(|e| e.to_string())?;
    Ok(())
}

/// Apply a JSON merge patch to the stored config, validate, and return the result.
/// Nothing is written; callers decide when to persist.
pub fn merge_alert_config(
    current: &AlertChannelConfig,
    patch_json: &str,
) -> Result<AlertChannelConfig, String> {
    let mut current_val = serde_json::to_value(current).map_err(|e| e.to_string())?;
    let patch_val: serde_json::Value =
        serde_json::from_str(patch_json).map_err(|e| e.to_string())?;
    merge_json(&mut current_val, &patch_val);
    let merged: AlertChannelConfig =
        serde_json::from_value(current_val).map_err(|e| e.to_string())?;
    merged.validate()?;
    Ok(merged)
}

pub fn load_provider_catalog(path: &Path) -> Result<ProviderCatalog, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map_err(|e| format!("Invalid provider catalog {}: {}", path.display(), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProviderCatalog::default()),
        Err(e) => Err(format!("Failed to read {}: {}", path.display(), e)),
    }
}

/// Kinds omitted from the file keep their built-in rules.
pub fn load_classifier_rules(path: &Path) -> Result<ClassifierRules, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map_err(|e| format!("Invalid classifier rules {}: {}", path.display(), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClassifierRules::default()),
        Err(e) => Err(format!("Failed to read {}: {}", path.display(), e)),
    }
}

fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) =
        (base, patch)
    {
        for (key, value) in patch_map {
            if value.is_null() {
                base_map.remove(key);
            } else if value.is_object() && base_map.get(key).is_some_and(|v| v.is_object()) {
                if let Some(inner) = base_map.get_mut(key) {
                    merge_json(inner, value);
                }
            } else {
                base_map.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Alert config shared between the policy and the hot-reload watcher.
#[derive(Clone, Default)]
pub struct SharedAlertConfig {
    inner: Arc<RwLock<AlertChannelConfig>>,
}

impl SharedAlertConfig {
    pub fn new(config: AlertChannelConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn get(&self) -> AlertChannelConfig {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace(&self, config: AlertChannelConfig) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Re-read the file. A bad file keeps the previous config in place.
    pub fn reload_from(&self, path: &Path) -> Result<(), String> {
        let mut config = load_alert_config(path)?;
        config.apply_env_overrides(|k| std::env::var(k).ok());
        config.validate()?;
        self.replace(config);
        info!(path = %path.display(), "Alert configuration reloaded");
        Ok(())
    }
}
