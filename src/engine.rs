//! `invoke()`: ranked, strictly sequential fallback across a caller's
//! provider credentials.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::AlertPolicy;
use crate::classifier::ClassifierRules;
use crate::client::{CompletionRequest, CompletionResponse, ProviderClient};
use crate::metrics::MetricsStore;
use crate::selector::{ProviderRegistry, Selector};
use crate::types::credential::ProviderCredential;
use crate::types::now_millis;
use crate::types::provider::{CallOutcome, CredentialHealth, ErrorKind, HealthStatus};
use crate::verify::{key_fingerprint, needs_verification, KeyVerification, VerifySummary};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptError {
    pub provider_name: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Every candidate was tried and every one failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateError {
    pub caller_id: String,
    /// Provider names in the order they were attempted.
    pub attempted: Vec<String>,
    pub last_error: AttemptError,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all {} providers failed for '{}' (last: {} {}: {})",
            self.attempted.len(),
            self.caller_id,
            self.last_error.provider_name,
            self.last_error.kind,
            self.last_error.message
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("no provider credentials configured for '{caller_id}'")]
    NoProviderConfigured { caller_id: String },
    #[error("{0}")]
    Exhausted(AggregateError),
}

pub struct InvocationEngine {
    registry: Arc<ProviderRegistry>,
    metrics: MetricsStore,
    alerts: Arc<AlertPolicy>,
    client: Arc<dyn ProviderClient>,
    rules: ClassifierRules,
}

impl InvocationEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        metrics: MetricsStore,
        alerts: Arc<AlertPolicy>,
        client: Arc<dyn ProviderClient>,
    ) -> Self {
        Self {
            registry,
            metrics,
            alerts,
            client,
            rules: ClassifierRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: ClassifierRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn alerts(&self) -> &AlertPolicy {
        &self.alerts
    }

    /// Try each ranked candidate once, in order, until one succeeds.
    ///
    /// Each attempt is recorded exactly once. Only exhaustion is surfaced;
    /// metrics and alerting failures are logged and never fail the request.
    pub async fn invoke(
        &self,
        caller_id: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, InvokeError> {
        let candidates = self.candidates(caller_id).await;
        if candidates.is_empty() {
            warn!(caller_id, "No usable provider credentials");
            return Err(InvokeError::NoProviderConfigured {
                caller_id: caller_id.to_string(),
            });
        }

        let mut attempted = Vec::with_capacity(candidates.len());
        let mut last_error = None;

        for cred in candidates {
            attempted.push(cred.provider_name.clone());
            let started = Instant::now();
            let result = self.client.complete(&cred, request).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(text) => {
                    self.record(&cred, CallOutcome::success(latency_ms, now_millis()))
                        .await;
                    info!(
                        caller_id,
                        provider = %cred.provider_name,
                        latency_ms,
                        attempts = attempted.len(),
                        "Invocation succeeded"
                    );
                    return Ok(CompletionResponse {
                        provider_name: cred.provider_name,
                        model: cred.model_hint,
                        text,
                        latency_ms,
                    });
                }
                Err(raw) => {
                    let kind = self.rules.classify(&raw);
                    let message = raw.describe();
                    warn!(
                        caller_id,
                        provider = %cred.provider_name,
                        kind = %kind,
                        error = %message,
                        "Provider attempt failed"
                    );
                    let outcome =
                        CallOutcome::failure(latency_ms, kind, message.clone(), now_millis());
                    if let Some(health) = self.record(&cred, outcome).await {
                        self.alerts.on_failure(&health, kind).await;
                    }
                    last_error = Some(AttemptError {
                        provider_name: cred.provider_name,
                        kind,
                        message,
                    });
                }
            }
        }

        // The loop ran at least once, so a last error exists.
        let last_error = last_error.ok_or_else(|| InvokeError::NoProviderConfigured {
            caller_id: caller_id.to_string(),
        })?;
        Err(InvokeError::Exhausted(AggregateError {
            caller_id: caller_id.to_string(),
            attempted,
            last_error,
        }))
    }

    /// Check each of `caller_id`'s credentials with a cheap provider call.
    /// Keys whose last check is still trusted are skipped unless `force`.
    ///
    /// Results move status and streak only. Verification never alerts and
    /// never counts as a call.
    pub async fn verify(&self, caller_id: &str, force: bool) -> Result<VerifySummary, String> {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let caller = caller_id.to_string();
        let (creds, known) = tokio::task::spawn_blocking(move || {
            let known = metrics.list_health(&caller)?;
            Ok::<_, String>((registry.credentials(&caller), known))
        })
        .await
        .map_err(|e| e.to_string())??;

        let now = now_millis();
        let mut summary = VerifySummary::default();
        for cred in creds {
            let key_hash = key_fingerprint(&cred.secret);
            let existing = known.iter().find(|h| h.provider_name == cred.provider_name);
            if !force && !needs_verification(existing, &key_hash, now) {
                debug!(key = %cred.key(), "Verification still fresh, skipping");
                summary.push(KeyVerification {
                    caller_id: cred.caller_id.clone(),
                    provider_name: cred.provider_name.clone(),
                    checked: false,
                    status: existing.map(|h| h.status).unwrap_or(HealthStatus::NotVerified),
                    error: None,
                });
                continue;
            }

            let (result, message) = match self.client.verify(&cred).await {
                Ok(()) => (Ok(()), None),
                Err(raw) => (Err(self.rules.classify(&raw)), Some(raw.describe())),
            };
            let metrics = self.metrics.clone();
            let key = cred.key();
            let error = message.clone();
            let health = tokio::task::spawn_blocking(move || {
                metrics.record_verification(
                    &key.caller_id,
                    &key.provider_name,
                    result,
                    error.as_deref(),
                    &key_hash,
                    now_millis(),
                )
            })
            .await
            .map_err(|e| e.to_string())??;

            info!(key = %cred.key(), status = %health.status, "Credential verified");
            summary.push(KeyVerification {
                caller_id: cred.caller_id,
                provider_name: cred.provider_name,
                checked: true,
                status: health.status,
                error: message,
            });
        }
        Ok(summary)
    }

    /// Ranking reads SQLite and may hit the OS keychain, so it runs on the
    /// blocking pool like every other store access.
    async fn candidates(&self, caller_id: &str) -> Vec<ProviderCredential> {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let caller = caller_id.to_string();
        let ranked =
            tokio::task::spawn_blocking(move || Selector::new(&registry, &metrics).rank(&caller))
                .await;
        match ranked {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(caller_id, error = %e, "Ranking task panicked, using configuration order");
                self.registry.credentials(caller_id)
            }
        }
    }

    async fn record(&self, cred: &ProviderCredential, outcome: CallOutcome) -> Option<CredentialHealth> {
        let metrics = self.metrics.clone();
        let key = cred.key();
        let joined = tokio::task::spawn_blocking(move || {
            metrics.record_outcome(&key.caller_id, &key.provider_name, &outcome)
        })
        .await;
        match joined {
            Ok(Ok(health)) => {
                debug!(
                    key = %cred.key(),
                    consecutive_failures = health.consecutive_failures,
                    "Recorded outcome"
                );
                Some(health)
            }
            Ok(Err(e)) => {
                warn!(key = %cred.key(), error = %e, "Failed to record outcome");
                None
            }
            Err(e) => {
                warn!(key = %cred.key(), error = %e, "Metrics task panicked");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::audit::AlertAuditLog;
    use crate::alerts::channels::Dispatcher;
    use crate::alerts::tests::CapturingChannel;
    use crate::classifier::RawError;
    use crate::config::{AlertChannelConfig, SharedAlertConfig};
    use crate::db;
    use crate::selector::SecretSource;
    use crate::types::config::ProviderCatalog;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Replies from a per-provider script; records every call it receives.
    struct ScriptedClient {
        script: Mutex<HashMap<String, VecDeque<Result<String, RawError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(entries: Vec<(&str, Vec<Result<String, RawError>>)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    entries
                        .into_iter()
                        .map(|(p, r)| (p.to_string(), r.into_iter().collect()))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedClient {
        async fn complete(
            &self,
            cred: &ProviderCredential,
            _request: &CompletionRequest,
        ) -> Result<String, RawError> {
            self.calls.lock().unwrap().push(cred.provider_name.clone());
            self.script
                .lock()
                .unwrap()
                .get_mut(&cred.provider_name)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Err(RawError::message("script exhausted")))
        }
    }

    fn registry(keys: &[(&str, &str)]) -> Arc<ProviderRegistry> {
        let secrets: HashMap<String, String> = keys
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(ProviderRegistry::new(
            ProviderCatalog::default(),
            Box::new(secrets) as Box<dyn SecretSource>,
        ))
    }

    fn all_keys() -> Arc<ProviderRegistry> {
        registry(&[
            ("RESEARCHER_ANTHROPIC_API_KEY", "sk-ant"),
            ("RESEARCHER_OPENAI_API_KEY", "sk-oai"),
            ("RESEARCHER_GOOGLE_AI_API_KEY", "g-key"),
        ])
    }

    struct Harness {
        _dir: tempfile::TempDir,
        engine: InvocationEngine,
        capture: Arc<CapturingChannel>,
    }

    fn harness(registry: Arc<ProviderRegistry>, client: Arc<ScriptedClient>, threshold: u32) -> Harness {
        let (dir, pool) = db::test_pool();
        let capture = CapturingChannel::new();
        let alerts = Arc::new(AlertPolicy::new(
            SharedAlertConfig::new(AlertChannelConfig {
                consecutive_failure_threshold: threshold,
                ..Default::default()
            }),
            Dispatcher::new().with_channel(capture.clone()),
            AlertAuditLog::new(pool.clone()),
        ));
        Harness {
            _dir: dir,
            engine: InvocationEngine::new(registry, MetricsStore::new(pool), alerts, client),
            capture,
        }
    }

    fn ok(text: &str) -> Result<String, RawError> {
        Ok(text.to_string())
    }

    fn unavailable() -> Result<String, RawError> {
        Err(RawError::status(503, "Service Unavailable"))
    }

    #[tokio::test]
    async fn falls_back_until_a_candidate_succeeds() {
        let client = ScriptedClient::new(vec![
            ("anthropic", vec![unavailable()]),
            ("openai", vec![Err(RawError::status(429, "Too Many Requests"))]),
            ("google", vec![ok("hello")]),
        ]);
        let h = harness(all_keys(), client.clone(), 3);

        let response = h
            .engine
            .invoke("researcher", &CompletionRequest::prompt("hi"))
            .await
            .unwrap();
        assert_eq!(response.provider_name, "google");
        assert_eq!(response.text, "hello");
        assert_eq!(client.calls(), vec!["anthropic", "openai", "google"]);

        let all = h.engine.metrics().list_health("researcher").unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.total_calls == 1));
        let openai = all.iter().find(|r| r.provider_name == "openai").unwrap();
        assert_eq!(openai.status.as_str(), "rate_limited");
        assert_eq!(openai.consecutive_failures, 1);
        let google = all.iter().find(|r| r.provider_name == "google").unwrap();
        assert_eq!(google.success_count, 1);
    }

    #[tokio::test]
    async fn first_success_stops_the_loop() {
        let client = ScriptedClient::new(vec![("anthropic", vec![ok("first")])]);
        let h = harness(all_keys(), client.clone(), 3);

        h.engine
            .invoke("researcher", &CompletionRequest::prompt("hi"))
            .await
            .unwrap();
        assert_eq!(client.calls(), vec!["anthropic"]);
        assert_eq!(h.engine.metrics().list_health("researcher").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let client = ScriptedClient::new(vec![
            ("anthropic", vec![unavailable()]),
            ("openai", vec![Err(RawError::status(401, "Unauthorized"))]),
            ("google", vec![Err(RawError::timeout("timed out"))]),
        ]);
        let h = harness(all_keys(), client.clone(), 3);

        let err = h
            .engine
            .invoke("researcher", &CompletionRequest::prompt("hi"))
            .await
            .unwrap_err();
        let InvokeError::Exhausted(agg) = err else {
            panic!("expected exhaustion");
        };
        assert_eq!(agg.attempted, vec!["anthropic", "openai", "google"]);
        assert_eq!(agg.last_error.provider_name, "google");
        assert_eq!(agg.last_error.kind, ErrorKind::NetworkError);

        // Each candidate tried exactly once.
        assert_eq!(client.calls().len(), 3);
        for row in h.engine.metrics().list_health("researcher").unwrap() {
            assert_eq!(row.total_calls, 1);
            assert_eq!(row.consecutive_failures, 1);
        }
    }

    #[tokio::test]
    async fn no_usable_credentials() {
        let client = ScriptedClient::new(vec![]);
        let h = harness(
            registry(&[("RESEARCHER_OPENAI_API_KEY", "# not set")]),
            client.clone(),
            3,
        );
        let err = h
            .engine
            .invoke("researcher", &CompletionRequest::prompt("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::NoProviderConfigured { .. }));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_provider_is_demoted_and_escalates() {
        let client = ScriptedClient::new(vec![
            ("anthropic", vec![unavailable(), unavailable()]),
            ("openai", vec![ok("a"), ok("b")]),
        ]);
        let h = harness(
            registry(&[
                ("RESEARCHER_ANTHROPIC_API_KEY", "sk-ant"),
                ("RESEARCHER_OPENAI_API_KEY", "sk-oai"),
            ]),
            client.clone(),
            1,
        );

        h.engine
            .invoke("researcher", &CompletionRequest::prompt("one"))
            .await
            .unwrap();
        assert_eq!(h.capture.sent.lock().unwrap().len(), 1);

        // anthropic is now 0/1, openai 1/1: openai is ranked first.
        let response = h
            .engine
            .invoke("researcher", &CompletionRequest::prompt("two"))
            .await
            .unwrap();
        assert_eq!(response.provider_name, "openai");
        assert_eq!(client.calls(), vec!["anthropic", "openai", "openai"]);
    }

    #[tokio::test]
    async fn custom_rules_change_classification() {
        let client = ScriptedClient::new(vec![
            ("anthropic", vec![Err(RawError::message("quota exceeded"))]),
            ("openai", vec![ok("done")]),
        ]);
        let h = harness(all_keys(), client, 3);
        let mut rules = ClassifierRules::default();
        rules.rate_limited.fragments.push("quota".to_string());
        let engine = h.engine.with_rules(rules);

        engine
            .invoke("researcher", &CompletionRequest::prompt("hi"))
            .await
            .unwrap();
        let anthropic = engine
            .metrics()
            .get_health("researcher", "anthropic")
            .unwrap()
            .unwrap();
        assert_eq!(anthropic.status.as_str(), "rate_limited");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_invocations_rank_from_shared_metrics() {
        let client = ScriptedClient::new(vec![
            ("anthropic", vec![unavailable()]),
            ("openai", (0..5).map(|_| ok("fine")).collect()),
        ]);
        let h = harness(
            registry(&[
                ("RESEARCHER_ANTHROPIC_API_KEY", "sk-ant"),
                ("RESEARCHER_OPENAI_API_KEY", "sk-oai"),
            ]),
            client.clone(),
            3,
        );
        h.engine
            .invoke("researcher", &CompletionRequest::prompt("warm up"))
            .await
            .unwrap();

        let request = CompletionRequest::prompt("hi");
        let responses = futures::future::join_all(
            (0..4).map(|_| h.engine.invoke("researcher", &request)),
        )
        .await;
        for response in responses {
            assert_eq!(response.unwrap().provider_name, "openai");
        }
        // anthropic was demoted after the first failure and never retried.
        assert_eq!(client.calls().iter().filter(|c| *c == "anthropic").count(), 1);
    }

    /// Answers verification per provider; counts how often it was asked.
    struct VerifyingClient {
        rejected: Vec<&'static str>,
        checks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProviderClient for VerifyingClient {
        async fn complete(
            &self,
            _cred: &ProviderCredential,
            _request: &CompletionRequest,
        ) -> Result<String, RawError> {
            Err(RawError::message("completions are not used here"))
        }

        async fn verify(&self, cred: &ProviderCredential) -> Result<(), RawError> {
            self.checks.lock().unwrap().push(cred.provider_name.clone());
            if self.rejected.contains(&cred.provider_name.as_str()) {
                Err(RawError::status(401, "Unauthorized"))
            } else {
                Ok(())
            }
        }
    }

    fn verifying_engine(
        registry: Arc<ProviderRegistry>,
        rejected: Vec<&'static str>,
    ) -> (tempfile::TempDir, InvocationEngine, Arc<VerifyingClient>, Arc<CapturingChannel>) {
        let (dir, pool) = db::test_pool();
        let capture = CapturingChannel::new();
        let client = Arc::new(VerifyingClient {
            rejected,
            checks: Mutex::new(Vec::new()),
        });
        let alerts = Arc::new(AlertPolicy::new(
            SharedAlertConfig::new(AlertChannelConfig {
                consecutive_failure_threshold: 1,
                ..Default::default()
            }),
            Dispatcher::new().with_channel(capture.clone()),
            AlertAuditLog::new(pool.clone()),
        ));
        let engine = InvocationEngine::new(registry, MetricsStore::new(pool), alerts, client.clone());
        (dir, engine, client, capture)
    }

    #[tokio::test]
    async fn verify_checks_new_keys_then_skips_fresh_ones() {
        let (_dir, engine, client, capture) = verifying_engine(all_keys(), vec!["google"]);

        let first = engine.verify("researcher", false).await.unwrap();
        assert_eq!((first.verified, first.skipped, first.total), (3, 0, 3));
        let google = first.keys.iter().find(|k| k.provider_name == "google").unwrap();
        assert_eq!(google.status, HealthStatus::Invalid);
        assert_eq!(google.error.as_deref(), Some("401 Unauthorized"));

        // Valid keys are trusted for a week; the rejected key is checked again.
        let second = engine.verify("researcher", false).await.unwrap();
        assert_eq!((second.verified, second.skipped), (1, 2));
        assert_eq!(client.checks.lock().unwrap().len(), 4);

        let anthropic = engine
            .metrics()
            .get_health("researcher", "anthropic")
            .unwrap()
            .unwrap();
        assert_eq!(anthropic.status, HealthStatus::Valid);
        assert_eq!(anthropic.total_calls, 0);
        assert_eq!(anthropic.key_hash.as_deref(), Some(key_fingerprint("sk-ant").as_str()));
        assert!(anthropic.last_verified_at.is_some());

        let google = engine.metrics().get_health("researcher", "google").unwrap().unwrap();
        assert_eq!(google.consecutive_failures, 2);
        assert!(capture.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_verifies_every_key() {
        let (_dir, engine, client, _capture) = verifying_engine(all_keys(), vec![]);
        engine.verify("researcher", false).await.unwrap();
        let forced = engine.verify("researcher", true).await.unwrap();
        assert_eq!((forced.verified, forced.skipped), (3, 0));
        assert_eq!(client.checks.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn rotated_key_is_verified_again() {
        let (_dir, engine, client, _capture) = verifying_engine(
            registry(&[("RESEARCHER_OPENAI_API_KEY", "sk-old")]),
            vec![],
        );
        engine.verify("researcher", false).await.unwrap();

        // Same database, new secret: a restarted process after rotation.
        let rotated = InvocationEngine::new(
            registry(&[("RESEARCHER_OPENAI_API_KEY", "sk-new")]),
            engine.metrics().clone(),
            engine.alerts.clone(),
            client.clone(),
        );
        let summary = rotated.verify("researcher", false).await.unwrap();
        assert_eq!(summary.verified, 1);
        let health = rotated.metrics().get_health("researcher", "openai").unwrap().unwrap();
        assert_eq!(health.key_hash.as_deref(), Some(key_fingerprint("sk-new").as_str()));
    }
}
