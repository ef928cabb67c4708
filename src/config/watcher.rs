//! Configuration file watcher for hot reload.
//!
//! Editors touch files in several steps (truncate, write, chmod), so only
//! content changes and re-creations trigger a reload. A file that fails to
//! load or validate is logged and the running configuration stays in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GuardConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Watches one configuration file and forwards validated configs.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end for validated configs.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let callback_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if triggers_reload(&event.kind) => {
                    reload(&callback_path, &update_tx);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(path = %callback_path.display(), error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}

/// Content changes and re-creations; metadata-only changes and reads are ignored.
fn triggers_reload(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Load `path` and forward it. Returns whether a config was sent.
fn reload(path: &Path, tx: &mpsc::UnboundedSender<GuardConfig>) -> bool {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(
                path = %path.display(),
                services = config.services.len(),
                "Config reloaded"
            );
            if tx.send(config).is_err() {
                tracing::warn!(path = %path.display(), "Config receiver dropped");
                return false;
            }
            true
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Config reload failed, keeping current");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind};
    use std::fs;

    #[test]
    fn test_only_content_changes_reload() {
        assert!(triggers_reload(&EventKind::Create(CreateKind::File)));
        assert!(triggers_reload(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(triggers_reload(&EventKind::Modify(ModifyKind::Any)));
        assert!(!triggers_reload(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions))));
        assert!(!triggers_reload(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn test_reload_forwards_valid_and_drops_invalid() {
        let path = std::env::temp_dir().join("upstream_guard_watcher_test.toml");
        let (tx, mut rx) = mpsc::unbounded_channel();

        fs::write(
            &path,
            r#"
            [[services]]
            name = "orders"
            nodes = [{ host = "127.0.0.1", port = 9000, weight = 2 }]
            "#,
        )
        .unwrap();
        assert!(reload(&path, &tx));
        assert_eq!(rx.try_recv().unwrap().services[0].name, "orders");

        fs::write(&path, "[degrade]\nthreshold = 4.0\n").unwrap();
        assert!(!reload(&path, &tx));
        assert!(rx.try_recv().is_err());

        fs::remove_file(&path).unwrap_or_default();
    }
}
