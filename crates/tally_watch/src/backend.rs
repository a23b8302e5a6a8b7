use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crossbeam::channel::{self, Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::WatchError;

/// OS-level file watching as seen by the [`DependencyWatcher`](crate::DependencyWatcher).
///
/// `watch`/`unwatch` are balanced per file and may be called whether or not
/// the backend is started.
pub trait WatchBackend {
    fn start(&mut self) -> Result<(), WatchError>;

    fn stop(&mut self);

    fn watch(&mut self, file: &Path) -> Result<(), WatchError>;

    fn unwatch(&mut self, file: &Path) -> Result<(), WatchError>;
}

/// [`WatchBackend`] on top of `notify`.
///
/// Files are watched through their parent directory so that editors that
/// save by replacing the file are still seen. Every changed path below a
/// watched directory is sent on the channel; unrelated paths have no
/// dependants and are ignored by the watcher.
pub struct NotifyBackend {
    changes: Sender<PathBuf>,
    watcher: Option<RecommendedWatcher>,
    /// Watched directories and how many watched files live in each.
    directories: BTreeMap<PathBuf, usize>,
}

impl NotifyBackend {
    pub fn new(changes: Sender<PathBuf>) -> Self {
        NotifyBackend {
            changes,
            watcher: None,
            directories: BTreeMap::new(),
        }
    }

    /// A backend together with the receiver of its change notifications.
    pub fn channel() -> (Self, Receiver<PathBuf>) {
        let (sender, receiver) = channel::unbounded();
        (NotifyBackend::new(sender), receiver)
    }

    fn directory(file: &Path) -> PathBuf {
        file.parent().map_or_else(|| file.to_path_buf(), Path::to_path_buf)
    }
}

impl WatchBackend for NotifyBackend {
    fn start(&mut self) -> Result<(), WatchError> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let changes = self.changes.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            let _ = changes.send(path);
                        }
                    }
                }
                Err(error) => tracing::warn!(%error, "file watcher error"),
            }
        })
        .map_err(WatchError::Start)?;

        for directory in self.directories.keys() {
            watcher
                .watch(directory, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: directory.clone(),
                    source,
                })?;
        }
        self.watcher = Some(watcher);
        tracing::debug!(directories = self.directories.len(), "file watcher started");
        Ok(())
    }

    fn stop(&mut self) {
        if self.watcher.take().is_some() {
            tracing::debug!("file watcher stopped");
        }
    }

    fn watch(&mut self, file: &Path) -> Result<(), WatchError> {
        let directory = NotifyBackend::directory(file);
        let count = self.directories.entry(directory.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Ok(());
        }
        if let Some(watcher) = &mut self.watcher {
            watcher
                .watch(&directory, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: directory,
                    source,
                })?;
        }
        Ok(())
    }

    fn unwatch(&mut self, file: &Path) -> Result<(), WatchError> {
        let directory = NotifyBackend::directory(file);
        let Some(count) = self.directories.get_mut(&directory) else {
            return Ok(());
        };
        *count -= 1;
        if *count > 0 {
            return Ok(());
        }
        self.directories.remove(&directory);
        if let Some(watcher) = &mut self.watcher {
            watcher
                .unwatch(&directory)
                .map_err(|source| WatchError::Unwatch {
                    path: directory,
                    source,
                })?;
        }
        Ok(())
    }
}
