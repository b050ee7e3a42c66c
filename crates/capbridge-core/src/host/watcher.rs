//! File system watcher for change detection

use super::collaborators::{UpdateSink, WatchService};
use super::deriver::{ChangeDeriver, DigestDeriver};
use super::grants::normalize_path;
use crate::error::{Error, HostError, Result};
use crate::types::WatchTarget;
use async_trait::async_trait;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Debounced change to a watched path
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Target the client asked for
    pub target: WatchTarget,
    /// Path that actually changed (may be below the target)
    pub path: PathBuf,
    pub kind: FileChangeKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// No further events within the debounce window
    Settled,
    /// Still changing at the end of the debounce window
    Continuous,
}

impl From<DebouncedEventKind> for FileChangeKind {
    fn from(kind: DebouncedEventKind) -> Self {
        match kind {
            DebouncedEventKind::AnyContinuous => Self::Continuous,
            _ => Self::Settled,
        }
    }
}

struct WatcherHandle {
    target: WatchTarget,
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// Watches paths and forwards debounced changes to a channel
pub struct FileWatcher {
    watchers: HashMap<PathBuf, WatcherHandle>,
    debounce: Duration,
    event_tx: mpsc::Sender<FileChangeEvent>,
}

impl FileWatcher {
    pub fn new(debounce: Duration, event_tx: mpsc::Sender<FileChangeEvent>) -> Self {
        Self {
            watchers: HashMap::new(),
            debounce,
            event_tx,
        }
    }

    /// Start watching a path on behalf of `target`.
    /// Returns `false` if the path was already watched.
    pub fn watch(&mut self, path: impl AsRef<Path>, target: WatchTarget) -> Result<bool> {
        let path = normalize_path(path.as_ref())?;

        if self.watchers.contains_key(&path) {
            debug!("Already watching: {:?}", path);
            return Ok(false);
        }

        if !path.exists() {
            return Err(Error::Host(HostError::WatchFailed(format!(
                "Path does not exist: {:?}",
                path
            ))));
        }

        info!("Starting watch on: {:?}", path);

        let mode = if path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let event_tx = self.event_tx.clone();
        let event_target = target.clone();

        // Runs on the debouncer's own thread.
        let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        let change = FileChangeEvent {
                            target: event_target.clone(),
                            path: event.path,
                            kind: event.kind.into(),
                            timestamp: chrono::Utc::now(),
                        };
                        if event_tx.blocking_send(change).is_err() {
                            debug!("Change receiver dropped");
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {:?}", e);
                }
            }
        })
        .map_err(|e| {
            Error::Host(HostError::WatchFailed(format!(
                "Failed to create watcher: {}",
                e
            )))
        })?;

        debouncer.watcher().watch(&path, mode).map_err(|e| {
            Error::Host(HostError::WatchFailed(format!(
                "Failed to watch path {:?}: {}",
                path, e
            )))
        })?;

        self.watchers.insert(
            path,
            WatcherHandle {
                target,
                _debouncer: debouncer,
            },
        );
        Ok(true)
    }

    /// Check if a path is covered by any watch
    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.watchers.keys().any(|p| path.starts_with(p))
    }

    /// Target a watched path was registered for
    pub fn target_of(&self, path: impl AsRef<Path>) -> Option<&WatchTarget> {
        self.watchers.get(path.as_ref()).map(|h| &h.target)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watchers.keys().cloned().collect()
    }
}

/// Default [`WatchService`]: a [`FileWatcher`] whose changes go through a
/// [`ChangeDeriver`] before reaching the client.
///
/// Serves one client connection; the sink from the first watch call carries
/// every later change.
pub struct FsWatchService {
    watcher: Mutex<FileWatcher>,
    changes: Mutex<Option<mpsc::Receiver<FileChangeEvent>>>,
    deriver: Arc<dyn ChangeDeriver>,
}

impl FsWatchService {
    pub fn new(debounce: Duration, deriver: Arc<dyn ChangeDeriver>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            watcher: Mutex::new(FileWatcher::new(debounce, tx)),
            changes: Mutex::new(Some(rx)),
            deriver,
        }
    }

    pub fn with_digests(debounce: Duration) -> Self {
        Self::new(debounce, Arc::new(DigestDeriver::new()))
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watcher.lock().watched_paths()
    }

    async fn forward_changes(
        mut rx: mpsc::Receiver<FileChangeEvent>,
        deriver: Arc<dyn ChangeDeriver>,
        sink: UpdateSink,
    ) {
        while let Some(event) = rx.recv().await {
            match deriver.derive(&event).await {
                Ok(Some(payload)) => {
                    if let Err(e) = sink.emit(&payload) {
                        warn!("Client gone, stopping change forwarding: {}", e);
                        break;
                    }
                }
                Ok(None) => trace!("Nothing to report for {:?}", event.path),
                Err(e) => warn!("Failed to derive update for {:?}: {}", event.path, e),
            }
        }
        debug!("Change forwarding ended");
    }
}

#[async_trait]
impl WatchService for FsWatchService {
    async fn watch(&self, target: WatchTarget, sink: UpdateSink) -> Result<()> {
        let path = normalize_path(Path::new(target.as_str()))?;

        // Drain changes as soon as the first sink is known.
        let changes = self.changes.lock().take();
        if let Some(rx) = changes {
            tokio::spawn(Self::forward_changes(rx, Arc::clone(&self.deriver), sink));
        }

        if self.watcher.lock().target_of(&path).is_some() {
            debug!("Already watching: {:?}", path);
            return Ok(());
        }
        if !path.exists() {
            return Err(Error::Host(HostError::WatchFailed(format!(
                "Path does not exist: {:?}",
                path
            ))));
        }

        // Registered only after priming succeeds.
        self.deriver.prime(&path).await?;
        self.watcher.lock().watch(&path, target)?;
        Ok(())
    }
}
