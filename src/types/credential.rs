use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::ProviderType;

/// One callable backend for one logical caller.
///
/// The secret is deliberately left out of `Debug` and never serialized.
#[derive(Clone, PartialEq)]
pub struct ProviderCredential {
    pub caller_id: String,
    pub provider_name: String,
    pub provider_type: ProviderType,
    pub secret: String,
    pub endpoint: String,
    pub model_hint: String,
    pub timeout_ms: u64,
}

impl ProviderCredential {
    pub fn key(&self) -> CredentialKey {
        CredentialKey::new(&self.caller_id, &self.provider_name)
    }

    /// Blank secrets and commented-out env values are not usable.
    pub fn has_usable_secret(&self) -> bool {
        let secret = self.secret.trim();
        !secret.is_empty() && !secret.starts_with('#')
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("caller_id", &self.caller_id)
            .field("provider_name", &self.provider_name)
            .field("provider_type", &self.provider_type)
            .field("endpoint", &self.endpoint)
            .field("model_hint", &self.model_hint)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialKey {
    pub caller_id: String,
    pub provider_name: String,
}

impl CredentialKey {
    pub fn new(caller_id: &str, provider_name: &str) -> Self {
        Self {
            caller_id: caller_id.to_string(),
            provider_name: provider_name.to_string(),
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.caller_id, self.provider_name)
    }
}
