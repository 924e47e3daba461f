use tracing::debug;

const SERVICE: &str = "dev.provwatch";

fn keychain_key(caller_id: &str, provider_name: &str) -> String {
    format!("{}:{}", caller_id, provider_name)
}

fn validate_key(caller_id: &str, provider_name: &str) -> Result<(), String> {
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };
    if valid(caller_id) && valid(provider_name) {
        Ok(())
    } else {
        Err(format!(
            "Invalid credential key: '{}/{}'. Use letters, digits, '-' or '_'",
            caller_id, provider_name
        ))
    }
}

fn entry(caller_id: &str, provider_name: &str) -> Result<keyring::Entry, String> {
    validate_key(caller_id, provider_name)?;
    keyring::Entry::new(SERVICE, &keychain_key(caller_id, provider_name))
        .map_err(|e| format!("Failed to create keychain entry: {}", e))
}

/// Store a provider secret in the OS keychain.
pub fn keychain_set(caller_id: &str, provider_name: &str, secret: &str) -> Result<(), String> {
    entry(caller_id, provider_name)?
        .set_password(secret)
        .map_err(|e| format!("Failed to store in keychain: {}", e))?;
    debug!(caller_id, provider = provider_name, "Secret stored in keychain");
    Ok(())
}

/// Retrieve a provider secret from the OS keychain. Returns None if not set.
pub fn keychain_get(caller_id: &str, provider_name: &str) -> Result<Option<String>, String> {
    match entry(caller_id, provider_name)?.get_password() {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(format!("Failed to read from keychain: {}", e)),
    }
}

pub fn keychain_delete(caller_id: &str, provider_name: &str) -> Result<(), String> {
    match entry(caller_id, provider_name)?.delete_credential() {
        Ok(()) => {
            debug!(caller_id, provider = provider_name, "Secret deleted from keychain");
            Ok(())
        }
        Err(keyring::Error::NoEntry) => Ok(()), // Already gone
        Err(e) => Err(format!("Failed to delete from keychain: {}", e)),
    }
}

pub fn keychain_exists(caller_id: &str, provider_name: &str) -> Result<bool, String> {
    keychain_get(caller_id, provider_name).map(|s| s.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keychain tests are marked #[ignore] because they interact with the real OS keychain
    // and may fail in CI environments without keychain access.

    #[test]
    #[ignore]
    fn keychain_set_and_get_roundtrip() {
        keychain_set("provwatch-test", "anthropic", "sk-test-123").unwrap();
        let result = keychain_get("provwatch-test", "anthropic").unwrap();
        assert_eq!(result.as_deref(), Some("sk-test-123"));
        keychain_delete("provwatch-test", "anthropic").unwrap();
    }

    #[test]
    #[ignore]
    fn keychain_delete_removes_entry() {
        keychain_set("provwatch-test", "openai", "sk-del").unwrap();
        assert!(keychain_exists("provwatch-test", "openai").unwrap());
        keychain_delete("provwatch-test", "openai").unwrap();
        assert!(!keychain_exists("provwatch-test", "openai").unwrap());
    }

    #[test]
    fn keychain_invalid_key_rejected() {
        assert!(keychain_set("bad caller", "anthropic", "x").is_err());
        assert!(keychain_get("researcher", "").is_err());
        assert!(keychain_delete("researcher", "open/ai").is_err());
        assert!(keychain_exists("", "openai").is_err());
    }

    #[test]
    fn keychain_key_joins_caller_and_provider() {
        assert_eq!(keychain_key("researcher", "openai"), "researcher:openai");
    }
}
