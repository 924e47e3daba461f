use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Anthropic,
    Openai,
    Google,
}

/// One entry of the provider catalog. Catalog order is the cold-start priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub endpoint: String,
    pub model: String,
    /// Suffix appended to the caller prefix, e.g. `ANTHROPIC_API_KEY`.
    pub api_key_suffix: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCatalog {
    pub providers: Vec<ProviderSpec>,
    /// Caller ids whose env prefix does not follow the kebab-to-snake rule.
    #[serde(default)]
    pub prefix_aliases: HashMap<String, String>,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        let mut prefix_aliases = HashMap::new();
        prefix_aliases.insert("image-generator".to_string(), "IMAGE_VIDEO_GENERATOR".to_string());
        Self {
            providers: vec![
                ProviderSpec {
                    name: "anthropic".to_string(),
                    provider_type: ProviderType::Anthropic,
                    endpoint: "https://api.anthropic.com/v1/messages".to_string(),
                    model: "claude-sonnet-4-20250514".to_string(),
                    api_key_suffix: "ANTHROPIC_API_KEY".to_string(),
                    timeout_ms: default_timeout_ms(),
                },
                ProviderSpec {
                    name: "openai".to_string(),
                    provider_type: ProviderType::Openai,
                    endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                    model: "gpt-4o-mini".to_string(),
                    api_key_suffix: "OPENAI_API_KEY".to_string(),
                    timeout_ms: default_timeout_ms(),
                },
                ProviderSpec {
                    name: "google".to_string(),
                    provider_type: ProviderType::Google,
                    endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
                    model: "gemini-1.5-flash".to_string(),
                    api_key_suffix: "GOOGLE_AI_API_KEY".to_string(),
                    timeout_ms: default_timeout_ms(),
                },
            ],
            prefix_aliases,
        }
    }
}
