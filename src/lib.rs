pub mod alerts;
pub mod classifier;
pub mod client;
pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod keychain;
pub mod metrics;
pub mod migrations;
pub mod report;
pub mod selector;
pub mod types;
pub mod verify;
pub mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::RecommendedWatcher;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::audit::AlertAuditLog;
use crate::alerts::channels::Dispatcher;
use crate::alerts::AlertPolicy;
use crate::client::{HttpProviderClient, ProviderClient};
use crate::config::SharedAlertConfig;
use crate::engine::InvocationEngine;
use crate::metrics::MetricsStore;
use crate::selector::{DefaultSecrets, ProviderRegistry, SecretSource};

/// Initialize structured logging with tracing.
/// Respects RUST_LOG env var; defaults to `info` level for this crate.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("provwatch_lib=info,provwatch=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Everything one process needs, built once at startup and passed by reference.
pub struct Monitor {
    data_dir: PathBuf,
    engine: InvocationEngine,
    watcher: Option<RecommendedWatcher>,
}

impl Monitor {
    /// Production wiring: `.env`, env/keychain secrets and HTTP providers.
    /// `watch` starts the config file watcher; one-shot callers pass false.
    pub fn open(data_dir: &Path, watch: bool) -> Result<Self, String> {
        dotenvy::dotenv().ok();
        Self::open_with(
            data_dir,
            Box::new(DefaultSecrets),
            Arc::new(HttpProviderClient::new()),
            watch,
        )
    }

    pub fn open_with(
        data_dir: &Path,
        secrets: Box<dyn SecretSource>,
        client: Arc<dyn ProviderClient>,
        watch: bool,
    ) -> Result<Self, String> {
        let db_path = data_dir.join("state").join("provwatch.sqlite");
        let pool = db::open(&db_path).map_err(|e| format!("Failed to open {}: {}", db_path.display(), e))?;

        let alert_path = config::alert_config_path(data_dir);
        let catalog_path = config::provider_catalog_path(data_dir);

        let mut alert_config = config::load_alert_config(&alert_path)?;
        alert_config.apply_env_overrides(|k| std::env::var(k).ok());
        alert_config.validate()?;
        let shared = SharedAlertConfig::new(alert_config);

        let catalog = config::load_provider_catalog(&catalog_path)?;
        let rules = config::load_classifier_rules(&config::classifier_rules_path(data_dir))?;
        info!(
            providers = catalog.providers.len(),
            data_dir = %data_dir.display(),
            "Provider monitor starting"
        );

        let watcher = if watch {
            match watcher::watch_config(shared.clone(), alert_path, catalog_path) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "Config hot reload disabled");
                    None
                }
            }
        } else {
            None
        };

        let alerts = Arc::new(AlertPolicy::new(
            shared,
            Dispatcher::new(),
            AlertAuditLog::new(pool.clone()),
        ));
        let engine = InvocationEngine::new(
            Arc::new(ProviderRegistry::new(catalog, secrets)),
            MetricsStore::new(pool),
            alerts,
            client,
        )
        .with_rules(rules);

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            engine,
            watcher,
        })
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn engine(&self) -> &InvocationEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &MetricsStore {
        self.engine.metrics()
    }

    pub fn alerts(&self) -> &AlertPolicy {
        self.engine.alerts()
    }
}
