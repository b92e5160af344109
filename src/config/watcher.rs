//! Configuration file watcher for hot-reload support
//!
//! Watches the directory holding the config file rather than the file itself:
//! editors that save by writing a temporary file and renaming it over the
//! original replace the inode, which a watch on the file would lose.

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period after the last change before the file is re-read
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Delivers a freshly loaded config after every valid edit of the file
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the config at `config_path` and watch it for changes.
    ///
    /// Invalid edits are logged and skipped; the previous config stays in
    /// effect.
    pub async fn new(config_path: PathBuf) -> Result<(Self, Arc<AppConfig>)> {
        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = config_path
            .file_name()
            .map(|name| name.to_os_string())
            .with_context(|| format!("Config path has no file name: {}", config_path.display()))?;

        let (change_tx, change_rx) = mpsc::unbounded_channel::<()>();
        let (tx, rx) = mpsc::channel(10);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|path| path.file_name() == Some(file_name.as_os_str()));
                    if touches_config && is_content_change(&event.kind) {
                        debug!("Config file changed: {:?}", event.kind);
                        let _ = change_tx.send(());
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        tokio::spawn(reload_loop(config_path.clone(), change_rx, tx));

        info!("Config file watcher started for: {}", config_path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            Arc::new(initial_config),
        ))
    }

    /// Wait for the next config update
    /// Returns None if the watcher has been closed
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

/// Writes, creations and renames onto the file; metadata and access events
/// are ignored.
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(ModifyKind::Name(mode)) => {
            matches!(mode, RenameMode::To | RenameMode::Both | RenameMode::Any)
        }
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Collapse bursts of change notifications into one reload each.
///
/// Ends when the watcher or the receiving side is dropped.
async fn reload_loop(
    config_path: PathBuf,
    mut changes: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<AppConfig>,
) {
    while changes.recv().await.is_some() {
        // Let the writer finish, swallowing the rest of the burst
        loop {
            match tokio::time::timeout(DEBOUNCE, changes.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) | Err(_) => break,
            }
        }

        match AppConfig::load(&config_path).await {
            Ok(new_config) => {
                info!("Configuration reloaded successfully");
                if tx.send(new_config).await.is_err() {
                    debug!("Config receiver dropped, stopping reloads");
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to reload config (keeping old config): {:#}", e);
            }
        }
    }
}
