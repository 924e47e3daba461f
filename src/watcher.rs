use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::SharedAlertConfig;

#[derive(Debug, PartialEq, Eq)]
pub enum WatchEvent {
    AlertConfigChanged,
    /// Credentials are fixed for the process lifetime; this only warns.
    ProviderCatalogChanged,
}

pub fn classify_event(event: &Event, alert_path: &Path, catalog_path: &Path) -> Option<WatchEvent> {
    match event.kind {
        EventKind::Modify(_) | EventKind::Create(_) => {
            for path in &event.paths {
                if path == alert_path {
                    return Some(WatchEvent::AlertConfigChanged);
                }
                if path == catalog_path {
                    return Some(WatchEvent::ProviderCatalogChanged);
                }
            }
            None
        }
        _ => None,
    }
}

/// Watch the data dir and hot-reload the alert config into `shared`.
///
/// The returned watcher must be kept alive for reloads to continue.
pub fn watch_config(
    shared: SharedAlertConfig,
    alert_path: PathBuf,
    catalog_path: PathBuf,
) -> Result<RecommendedWatcher, notify::Error> {
    let dir = alert_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let reload_path = alert_path.clone();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Config watch error");
                return;
            }
        };
        match classify_event(&event, &reload_path, &catalog_path) {
            Some(WatchEvent::AlertConfigChanged) => {
                if let Err(e) = shared.reload_from(&reload_path) {
                    warn!(error = %e, "Keeping previous alert configuration");
                }
            }
            Some(WatchEvent::ProviderCatalogChanged) => {
                warn!("Provider catalog changed; restart to pick up new providers");
            }
            None => {}
        }
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(dir = %dir.display(), "Watching configuration");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{alert_config_path, provider_catalog_path, AlertChannelConfig};
    use notify::event::{CreateKind, ModifyKind, RenameMode};

    fn make_event(kind: EventKind, paths: Vec<PathBuf>) -> Event {
        Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    fn paths() -> (PathBuf, PathBuf) {
        let dir = Path::new("/home/user/.provwatch");
        (alert_config_path(dir), provider_catalog_path(dir))
    }

    #[test]
    fn classify_alert_config_modify() {
        let (alert, catalog) = paths();
        let event = make_event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            vec![alert.clone()],
        );
        assert_eq!(
            classify_event(&event, &alert, &catalog),
            Some(WatchEvent::AlertConfigChanged)
        );
    }

    #[test]
    fn classify_rename_into_place() {
        let (alert, catalog) = paths();
        let tmp = alert.with_extension("json.tmp");
        let event = make_event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            vec![tmp, alert.clone()],
        );
        assert_eq!(
            classify_event(&event, &alert, &catalog),
            Some(WatchEvent::AlertConfigChanged)
        );
    }

    #[test]
    fn classify_catalog_create() {
        let (alert, catalog) = paths();
        let event = make_event(EventKind::Create(CreateKind::File), vec![catalog.clone()]);
        assert_eq!(
            classify_event(&event, &alert, &catalog),
            Some(WatchEvent::ProviderCatalogChanged)
        );
    }

    #[test]
    fn classify_ignores_delete() {
        let (alert, catalog) = paths();
        let event = make_event(
            EventKind::Remove(notify::event::RemoveKind::File),
            vec![alert.clone()],
        );
        assert!(classify_event(&event, &alert, &catalog).is_none());
    }

    #[test]
    fn classify_ignores_unrelated_file() {
        let (alert, catalog) = paths();
        let event = make_event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            vec![PathBuf::from("/home/user/.provwatch/state/provwatch.sqlite-wal")],
        );
        assert!(classify_event(&event, &alert, &catalog).is_none());
    }

    #[test]
    fn watcher_starts_on_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedAlertConfig::new(AlertChannelConfig::default());
        let result = watch_config(
            shared,
            alert_config_path(dir.path()),
            provider_catalog_path(dir.path()),
        );
        assert!(result.is_ok());
    }
}
