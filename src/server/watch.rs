//! Watched files that restart the operator when they change
//!
//! Each file's content is snapshotted at startup. Filesystem events in the
//! parent directories cause a re-read; the first file whose content differs
//! from its snapshot (including appearing or disappearing) is reported once.
//! Watching the directory instead of the file catches atomic replaces such
//! as the symlink swap used for mounted Secrets.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create file watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Directory to watch for a given file
fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn read_snapshot(path: &Path) -> Option<Vec<u8>> {
    std::fs::read(path).ok()
}

/// Watches a set of files and reports the first content change
pub struct FileWatcher {
    // Dropping the watcher stops the notify thread
    _watcher: Option<RecommendedWatcher>,
    changes: Option<mpsc::UnboundedReceiver<PathBuf>>,
}

impl FileWatcher {
    /// Snapshot `paths` and start watching them
    ///
    /// With no paths nothing is watched and [`changed`](Self::changed) never
    /// completes.
    pub fn start(paths: &[PathBuf]) -> Result<Self, WatchError> {
        if paths.is_empty() {
            return Ok(Self {
                _watcher: None,
                changes: None,
            });
        }

        let mut snapshots: HashMap<PathBuf, Option<Vec<u8>>> = paths
            .iter()
            .map(|p| (p.clone(), read_snapshot(p)))
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove())
                    {
                        return;
                    }
                    debug!(kind = ?event.kind, paths = ?event.paths, "Filesystem event");
                    for (path, snapshot) in snapshots.iter_mut() {
                        let current = read_snapshot(path);
                        if current != *snapshot {
                            *snapshot = current;
                            let _ = tx.send(path.clone());
                        }
                    }
                }
                Err(e) => error!(error = ?e, "Watch error"),
            },
            Config::default(),
        )
        .map_err(WatchError::Init)?;

        let dirs: BTreeSet<PathBuf> = paths.iter().map(|p| watch_dir(p)).collect();
        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: dir.clone(),
                    source,
                })?;
        }

        info!(files = ?paths, "File watcher started");
        Ok(Self {
            _watcher: Some(watcher),
            changes: Some(rx),
        })
    }

    /// Wait for the next watched file whose content changed
    pub async fn changed(&mut self) -> PathBuf {
        if let Some(changes) = self.changes.as_mut() {
            if let Some(path) = changes.recv().await {
                return path;
            }
        }
        std::future::pending().await
    }
}
