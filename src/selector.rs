//! Provider registry and health-based candidate ranking.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use crate::metrics::MetricsStore;
use crate::types::config::{ProviderCatalog, ProviderSpec};
use crate::types::credential::ProviderCredential;
use crate::types::provider::CredentialHealth;

/// Where provider secrets come from.
pub trait SecretSource: Send + Sync {
    fn lookup(&self, caller_id: &str, provider_name: &str, env_var: &str) -> Option<String>;
}

pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn lookup(&self, _caller_id: &str, _provider_name: &str, env_var: &str) -> Option<String> {
        std::env::var(env_var).ok()
    }
}

pub struct KeychainSecrets;

impl SecretSource for KeychainSecrets {
    fn lookup(&self, caller_id: &str, provider_name: &str, _env_var: &str) -> Option<String> {
        match crate::keychain::keychain_get(caller_id, provider_name) {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, caller_id, provider = provider_name, "Keychain read failed");
                None
            }
        }
    }
}

/// Environment first, OS keychain as fallback.
pub struct DefaultSecrets;

impl SecretSource for DefaultSecrets {
    fn lookup(&self, caller_id: &str, provider_name: &str, env_var: &str) -> Option<String> {
        EnvSecrets
            .lookup(caller_id, provider_name, env_var)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| KeychainSecrets.lookup(caller_id, provider_name, env_var))
    }
}

impl SecretSource for HashMap<String, String> {
    fn lookup(&self, _caller_id: &str, _provider_name: &str, env_var: &str) -> Option<String> {
        self.get(env_var).cloned()
    }
}

/// kebab-case caller id to the SCREAMING_SNAKE env prefix, honouring aliases.
pub fn env_prefix(catalog: &ProviderCatalog, caller_id: &str) -> String {
    if let Some(alias) = catalog.prefix_aliases.get(caller_id) {
        return alias.clone();
    }
    caller_id.to_uppercase().replace('-', "_")
}

pub fn env_var_for(catalog: &ProviderCatalog, caller_id: &str, spec: &ProviderSpec) -> String {
    format!("{}_{}", env_prefix(catalog, caller_id), spec.api_key_suffix)
}

/// Resolves and caches each caller's credentials in catalog order.
///
/// Resolution happens once per caller; the result is immutable afterwards.
pub struct ProviderRegistry {
    catalog: ProviderCatalog,
    secrets: Box<dyn SecretSource>,
    resolved: RwLock<HashMap<String, Vec<ProviderCredential>>>,
}

impl ProviderRegistry {
    pub fn new(catalog: ProviderCatalog, secrets: Box<dyn SecretSource>) -> Self {
        Self {
            catalog,
            secrets,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Usable credentials for `caller_id`, in configuration order.
    pub fn credentials(&self, caller_id: &str) -> Vec<ProviderCredential> {
        if let Some(creds) = self
            .resolved
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(caller_id)
        {
            return creds.clone();
        }

        let creds = self.resolve(caller_id);
        let mut map = self.resolved.write().unwrap_or_else(|e| e.into_inner());
        map.entry(caller_id.to_string()).or_insert(creds).clone()
    }

    fn resolve(&self, caller_id: &str) -> Vec<ProviderCredential> {
        let creds: Vec<ProviderCredential> = self
            .catalog
            .providers
            .iter()
            .filter_map(|spec| {
                let env_var = env_var_for(&self.catalog, caller_id, spec);
                let secret = self.secrets.lookup(caller_id, &spec.name, &env_var)?;
                let cred = ProviderCredential {
                    caller_id: caller_id.to_string(),
                    provider_name: spec.name.clone(),
                    provider_type: spec.provider_type,
                    secret,
                    endpoint: spec.endpoint.clone(),
                    model_hint: spec.model.clone(),
                    timeout_ms: spec.timeout_ms,
                };
                cred.has_usable_secret().then_some(cred)
            })
            .collect();
        debug!(
            caller_id,
            providers = ?creds.iter().map(|c| c.provider_name.as_str()).collect::<Vec<_>>(),
            "Resolved provider credentials"
        );
        creds
    }
}

/// Ranks a caller's credentials by live health.
pub struct Selector<'a> {
    registry: &'a ProviderRegistry,
    metrics: &'a MetricsStore,
}

impl<'a> Selector<'a> {
    pub fn new(registry: &'a ProviderRegistry, metrics: &'a MetricsStore) -> Self {
        Self { registry, metrics }
    }

    /// Credentials in preference order. A metrics read failure falls back to
    /// configuration order.
    pub fn rank(&self, caller_id: &str) -> Vec<ProviderCredential> {
        let creds = self.registry.credentials(caller_id);
        if creds.len() < 2 {
            return creds;
        }
        let health = match self.metrics.list_health(caller_id) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, caller_id, "Health lookup failed, using configuration order");
                return creds;
            }
        };
        rank_by_health(creds, &health)
    }
}

/// Unmeasured credentials keep their configuration slot. The slots held by
/// measured credentials are refilled with those credentials ordered by success
/// rate (desc), average latency (asc), then configuration order.
pub fn rank_by_health(
    creds: Vec<ProviderCredential>,
    health: &[CredentialHealth],
) -> Vec<ProviderCredential> {
    let lookup: HashMap<&str, &CredentialHealth> = health
        .iter()
        .filter(|h| h.total_calls > 0)
        .map(|h| (h.provider_name.as_str(), h))
        .collect();

    let measured_slots: Vec<usize> = creds
        .iter()
        .enumerate()
        .filter(|(_, c)| lookup.contains_key(c.provider_name.as_str()))
        .map(|(i, _)| i)
        .collect();

    let mut measured: Vec<(usize, &CredentialHealth)> = measured_slots
        .iter()
        .map(|&i| (i, lookup[creds[i].provider_name.as_str()]))
        .collect();
    measured.sort_by(|(ia, a), (ib, b)| {
        // a.s/a.t vs b.s/b.t compared exactly by cross-multiplying
        let rate_a = a.success_count as u128 * b.total_calls as u128;
        let rate_b = b.success_count as u128 * a.total_calls as u128;
        rate_b
            .cmp(&rate_a)
            .then_with(|| a.average_latency_ms.total_cmp(&b.average_latency_ms))
            .then_with(|| ia.cmp(ib))
    });

    let mut order: Vec<usize> = (0..creds.len()).collect();
    for (slot, (original, _)) in measured_slots.iter().zip(measured.iter()) {
        order[*slot] = *original;
    }

    let mut slots: Vec<Option<ProviderCredential>> = creds.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::types::provider::{CallOutcome, ErrorKind, HealthStatus};

    fn secrets(pairs: &[(&str, &str)]) -> Box<dyn SecretSource> {
        Box::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<String, String>>(),
        )
    }

    fn all_keys() -> Box<dyn SecretSource> {
        secrets(&[
            ("RESEARCHER_ANTHROPIC_API_KEY", "sk-ant"),
            ("RESEARCHER_OPENAI_API_KEY", "sk-oai"),
            ("RESEARCHER_GOOGLE_AI_API_KEY", "g-key"),
        ])
    }

    fn health(provider: &str, total: u64, ok: u64, latency: f64) -> CredentialHealth {
        CredentialHealth {
            caller_id: "researcher".to_string(),
            provider_name: provider.to_string(),
            total_calls: total,
            success_count: ok,
            average_latency_ms: latency,
            consecutive_failures: 0,
            last_outcome_at: None,
            last_success_at: None,
            last_error: None,
            status: HealthStatus::Valid,
            key_hash: None,
            last_verified_at: None,
        }
    }

    fn names(creds: &[ProviderCredential]) -> Vec<&str> {
        creds.iter().map(|c| c.provider_name.as_str()).collect()
    }

    #[test]
    fn env_prefix_converts_kebab_case() {
        let catalog = ProviderCatalog::default();
        assert_eq!(env_prefix(&catalog, "data-scientist"), "DATA_SCIENTIST");
        assert_eq!(env_prefix(&catalog, "researcher"), "RESEARCHER");
    }

    #[test]
    fn env_prefix_honours_aliases() {
        let catalog = ProviderCatalog::default();
        assert_eq!(env_prefix(&catalog, "image-generator"), "IMAGE_VIDEO_GENERATOR");
    }

    #[test]
    fn registry_keeps_catalog_order() {
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        let creds = registry.credentials("researcher");
        assert_eq!(names(&creds), vec!["anthropic", "openai", "google"]);
        assert_eq!(creds[1].secret, "sk-oai");
        assert_eq!(creds[1].endpoint, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn registry_excludes_unusable_secrets() {
        let registry = ProviderRegistry::new(
            ProviderCatalog::default(),
            secrets(&[
                ("RESEARCHER_ANTHROPIC_API_KEY", "   "),
                ("RESEARCHER_OPENAI_API_KEY", "# disabled"),
                ("RESEARCHER_GOOGLE_AI_API_KEY", "g-key"),
            ]),
        );
        assert_eq!(names(&registry.credentials("researcher")), vec!["google"]);
    }

    #[test]
    fn unknown_caller_has_no_credentials() {
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        assert!(registry.credentials("communications").is_empty());
    }

    #[test]
    fn cold_start_preserves_configuration_order() {
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        let ranked = rank_by_health(registry.credentials("researcher"), &[]);
        assert_eq!(names(&ranked), vec!["anthropic", "openai", "google"]);
    }

    #[test]
    fn higher_success_rate_ranks_first() {
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        let ranked = rank_by_health(
            registry.credentials("researcher"),
            &[
                health("anthropic", 10, 5, 100.0),
                health("openai", 10, 9, 300.0),
                health("google", 10, 7, 50.0),
            ],
        );
        assert_eq!(names(&ranked), vec!["openai", "google", "anthropic"]);
    }

    #[test]
    fn latency_breaks_success_rate_ties() {
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        let ranked = rank_by_health(
            registry.credentials("researcher"),
            &[
                health("anthropic", 4, 4, 900.0),
                health("openai", 2, 2, 200.0),
                health("google", 8, 8, 450.0),
            ],
        );
        assert_eq!(names(&ranked), vec!["openai", "google", "anthropic"]);
    }

    #[test]
    fn unmeasured_credential_keeps_its_slot() {
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        // openai has no calls yet: it stays second while the measured ones swap.
        let ranked = rank_by_health(
            registry.credentials("researcher"),
            &[
                health("anthropic", 10, 2, 100.0),
                health("openai", 0, 0, 0.0),
                health("google", 10, 10, 100.0),
            ],
        );
        assert_eq!(names(&ranked), vec!["google", "openai", "anthropic"]);
    }

    #[test]
    fn full_tie_falls_back_to_configuration_order() {
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        let ranked = rank_by_health(
            registry.credentials("researcher"),
            &[
                health("anthropic", 3, 3, 100.0),
                health("openai", 6, 6, 100.0),
                health("google", 9, 9, 100.0),
            ],
        );
        assert_eq!(names(&ranked), vec!["anthropic", "openai", "google"]);
    }

    #[test]
    fn rank_is_idempotent_over_the_store() {
        let (_dir, pool) = db::test_pool();
        let metrics = MetricsStore::new(pool);
        let registry = ProviderRegistry::new(ProviderCatalog::default(), all_keys());
        metrics
            .record_outcome(
                "researcher",
                "anthropic",
                &CallOutcome::failure(10, ErrorKind::NetworkError, "503", 1),
            )
            .unwrap();
        metrics
            .record_outcome("researcher", "google", &CallOutcome::success(30, 2))
            .unwrap();

        let selector = Selector::new(&registry, &metrics);
        let first = selector.rank("researcher");
        let second = selector.rank("researcher");
        assert_eq!(names(&first), names(&second));
        assert_eq!(names(&first), vec!["google", "openai", "anthropic"]);
    }

    #[test]
    fn rank_empty_when_nothing_configured() {
        let (_dir, pool) = db::test_pool();
        let metrics = MetricsStore::new(pool);
        let registry = ProviderRegistry::new(ProviderCatalog::default(), secrets(&[]));
        assert!(Selector::new(&registry, &metrics).rank("researcher").is_empty());
    }
}
