use crate::keychain;
use crate::Monitor;

fn validate_provider(monitor: &Monitor, provider_name: &str) -> Result<(), String> {
    let catalog = monitor.engine().registry().catalog();
    if catalog.providers.iter().any(|p| p.name == provider_name) {
        Ok(())
    } else {
        let known: Vec<&str> = catalog.providers.iter().map(|p| p.name.as_str()).collect();
        Err(format!(
            "Unknown provider '{}'. Must be one of: {}",
            provider_name,
            known.join(", ")
        ))
    }
}

/// Store a secret in the OS keychain. Environment variables still take
/// precedence at resolution time.
pub fn credentials_set(
    monitor: &Monitor,
    caller_id: &str,
    provider_name: &str,
    secret: &str,
) -> Result<(), String> {
    validate_provider(monitor, provider_name)?;
    if secret.trim().is_empty() {
        return Err("Secret must not be empty".to_string());
    }
    keychain::keychain_set(caller_id, provider_name, secret)
}

pub fn credentials_delete(monitor: &Monitor, caller_id: &str, provider_name: &str) -> Result<(), String> {
    validate_provider(monitor, provider_name)?;
    keychain::keychain_delete(caller_id, provider_name)
}

pub fn credentials_exists(monitor: &Monitor, caller_id: &str, provider_name: &str) -> Result<bool, String> {
    validate_provider(monitor, provider_name)?;
    keychain::keychain_exists(caller_id, provider_name)
}
