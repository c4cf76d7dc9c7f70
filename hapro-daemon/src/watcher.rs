//! DirectoryWatcher: detects new backup archives in the backup directory.
//!
//! Each filesystem notification re-lists the directory. When the entry count
//! differs from the last snapshot, the first entry (in name order) that was
//! not in the previous snapshot is the new file. Only one file is reported
//! per notification; several archives landing between two notifications are
//! not all seen.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use hapro_core::types::is_archive;

use crate::error::DaemonError;
use crate::poller::CompletionTracker;

/// Last observed listing of the watched directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchState {
    last_file_count: usize,
    previous_files: BTreeSet<String>,
}

impl WatchState {
    pub fn new(initial: impl IntoIterator<Item = String>) -> Self {
        let previous_files: BTreeSet<String> = initial.into_iter().collect();
        Self {
            last_file_count: previous_files.len(),
            previous_files,
        }
    }

    pub fn file_count(&self) -> usize {
        self.last_file_count
    }

    pub fn files(&self) -> &BTreeSet<String> {
        &self.previous_files
    }

    /// Record a fresh listing and return the new file, if the count changed
    /// and something appeared. The snapshot is replaced either way.
    pub fn observe(&mut self, listing: impl IntoIterator<Item = String>) -> Option<String> {
        let current: BTreeSet<String> = listing.into_iter().collect();
        let new_file = if current.len() != self.last_file_count {
            current.difference(&self.previous_files).next().cloned()
        } else {
            None
        };
        self.last_file_count = current.len();
        self.previous_files = current;
        new_file
    }
}

/// Entry names in `dir`. A listing failure is logged and reads as empty.
pub fn list_files(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect(),
        Err(err) => {
            error!(path = %dir.display(), error = %err, "failed to list backup directory");
            Vec::new()
        }
    }
}

/// A watched directory plus its snapshot.
#[derive(Debug)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    extension: String,
    state: WatchState,
}

impl DirectoryWatcher {
    /// Snapshot `dir` as it is now.
    pub fn start(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let dir = dir.into();
        let state = WatchState::new(list_files(&dir));
        debug!(path = %dir.display(), files = state.file_count(), "initial backup directory snapshot");
        Self {
            dir,
            extension: extension.into(),
            state,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Handle one change notification; returns a newly created archive name.
    pub fn on_change(&mut self) -> Option<String> {
        let new_file = self.state.observe(list_files(&self.dir))?;
        if is_archive(&new_file, &self.extension) {
            info!(file = %new_file, "new backup archive detected");
            Some(new_file)
        } else {
            debug!(file = %new_file, "new file is not a backup archive");
            None
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

fn register(
    dir: &Path,
    event_tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> Result<RecommendedWatcher, DaemonError> {
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Watch `dir` until shutdown, handing new archives to `tracker`.
///
/// Notifications are handled one at a time. If the directory cannot be
/// registered the task logs and idles until shutdown.
pub async fn watcher_task(
    dir: PathBuf,
    extension: String,
    tracker: CompletionTracker,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut watcher = DirectoryWatcher::start(&dir, extension);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let _registration = match register(&dir, event_tx) {
        Ok(registration) => registration,
        Err(err) => {
            error!(path = %dir.display(), error = %err, "cannot watch backup directory");
            let _ = shutdown_rx.recv().await;
            return Ok(());
        }
    };
    info!(path = %dir.display(), "watching backup directory");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                if let Some(archive) = watcher.on_change() {
                    tracker.track(&archive);
                }
            }
        }
    }

    Ok(())
}
