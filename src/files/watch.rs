use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

use super::FileAccess;
use crate::config::timing;
use crate::error::{AppError, AppResult};
use crate::protocol::ServerMessage;
use crate::session::Registry;

/// Per-path debounce: the first change schedules a flush, later changes
/// inside the window ride along with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Debounce {
    Idle,
    PendingFlush(Instant),
}

impl Debounce {
    fn on_change(self, now: Instant, window: Duration) -> Self {
        match self {
            Debounce::Idle => Debounce::PendingFlush(now + window),
            pending => pending,
        }
    }
}

/// An OS watch plus the task that turns its events into `file-update`s.
struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type WatchKey = (String, PathBuf);

/// Owns every file watch, keyed by (client, canonical path).
pub struct WatchManager {
    watches: Mutex<HashMap<WatchKey, WatchHandle>>,
    access: Arc<FileAccess>,
    registry: Arc<Registry>,
    window: Duration,
}

impl WatchManager {
    pub fn new(access: Arc<FileAccess>, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            watches: Mutex::new(HashMap::new()),
            access,
            registry,
            window: timing::WATCH_DEBOUNCE,
        })
    }

    #[cfg(test)]
    pub fn is_watching(&self, client_id: &str, path: &Path) -> bool {
        self.watches
            .lock()
            .contains_key(&(client_id.to_string(), path.to_path_buf()))
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.watches.lock().len()
    }

    /// Start watching. Watching an already-watched path is a no-op.
    /// Returns the resolved path.
    pub fn watch(self: &Arc<Self>, client_id: &str, raw_path: &str) -> AppResult<PathBuf> {
        let path = self.access.resolve(raw_path)?;
        let key = (client_id.to_string(), path.clone());
        let mut watches = self.watches.lock();
        if watches.contains_key(&key) {
            return Ok(path);
        }

        let (tx, rx) = mpsc::unbounded_channel::<()>();
        let target = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                let _ = tx.send(());
                return;
            };
            if !event.paths.iter().any(|p| p == &target) {
                return;
            }
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)) {
                let _ = tx.send(());
            }
        })
        .map_err(|e| AppError::ReadFailure(e.to_string()))?;

        // Watch the parent so replaced or deleted files are still noticed.
        let dir = path.parent().unwrap_or(&path);
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| AppError::ReadFailure(e.to_string()))?;

        let task = tokio::spawn(Self::run(Arc::downgrade(self), key.clone(), rx, self.window));
        watches.insert(key, WatchHandle { _watcher: watcher, task });
        tracing::info!(client_id, path = %path.display(), "Watching file");
        Ok(path)
    }

    /// Stop watching. Unwatching an unwatched path is a no-op.
    pub fn unwatch(&self, client_id: &str, raw_path: &str) {
        let Ok(path) = self.access.resolve(raw_path) else {
            return;
        };
        self.remove(&(client_id.to_string(), path));
    }

    /// Drop every watch a client holds.
    pub fn unwatch_all(&self, client_id: &str) {
        let removed: Vec<WatchHandle> = {
            let mut watches = self.watches.lock();
            let keys: Vec<WatchKey> = watches.keys().filter(|(c, _)| c == client_id).cloned().collect();
            keys.iter().filter_map(|k| watches.remove(k)).collect()
        };
        if !removed.is_empty() {
            tracing::info!(client_id, count = removed.len(), "Dropped file watches");
        }
    }

    fn remove(&self, key: &WatchKey) -> bool {
        // Drop outside the lock: dropping aborts the task.
        let handle = self.watches.lock().remove(key);
        if handle.is_some() {
            tracing::info!(client_id = %key.0, path = %key.1.display(), "Stopped watching file");
        }
        handle.is_some()
    }

    async fn run(
        manager: Weak<Self>,
        key: WatchKey,
        mut changes: mpsc::UnboundedReceiver<()>,
        window: Duration,
    ) {
        let mut state = Debounce::Idle;
        loop {
            match state {
                Debounce::Idle => {
                    if changes.recv().await.is_none() {
                        return;
                    }
                    state = state.on_change(Instant::now(), window);
                }
                Debounce::PendingFlush(deadline) => {
                    tokio::select! {
                        change = changes.recv() => {
                            if change.is_none() {
                                return;
                            }
                            state = state.on_change(Instant::now(), window);
                        }
                        _ = sleep_until(deadline) => {
                            state = Debounce::Idle;
                            let Some(manager) = manager.upgrade() else {
                                return;
                            };
                            if !manager.flush(&key) {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Re-read and push the file. On failure, report it and unregister.
    /// Returns whether the watch is still alive.
    fn flush(&self, key: &WatchKey) -> bool {
        let (client_id, path) = key;
        let raw = path.to_string_lossy();
        match self.access.read_file(&raw) {
            Ok((_, content)) => {
                self.registry.send(
                    client_id,
                    ServerMessage::FileUpdate {
                        path: path.to_string_lossy().to_string(),
                        content: Some(content),
                        error: None,
                    },
                );
                true
            }
            Err(e) => {
                tracing::info!(client_id = %client_id, path = %path.display(), error = %e, "Watched file unreadable");
                self.registry.send(
                    client_id,
                    ServerMessage::FileUpdate {
                        path: path.to_string_lossy().to_string(),
                        content: None,
                        error: Some(e.to_string()),
                    },
                );
                self.remove(key);
                false
            }
        }
    }
}
