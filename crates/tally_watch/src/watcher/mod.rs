//! Dependency watcher.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tally_core::ModuleId;

use crate::{NotifyBackend, WatchBackend, WatchError};

/// Absolute form of `path` with its directory resolved through symlinks,
/// so that notification paths and dependency paths compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map_or_else(|_| absolute.clone(), |parent| parent.join(name)),
        _ => absolute,
    }
}

/// Reverse index from files to the modules that depend on them.
pub struct DependencyWatcher<B: WatchBackend = NotifyBackend> {
    backend: B,
    dependencies: FxHashMap<ModuleId, BTreeSet<PathBuf>>,
    dependants: FxHashMap<PathBuf, BTreeSet<ModuleId>>,
    running: bool,
}

impl<B: WatchBackend> DependencyWatcher<B> {
    pub fn new(backend: B) -> Self {
        DependencyWatcher {
            backend,
            dependencies: FxHashMap::default(),
            dependants: FxHashMap::default(),
            running: false,
        }
    }

    /// Begin delivering notifications. Nothing needs to be watched yet.
    pub fn start(&mut self) -> Result<(), WatchError> {
        self.backend.start()?;
        self.running = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.backend.stop();
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Replace the file set of `module`.
    ///
    /// Only the difference from the previous set touches the backend: files
    /// that stay are never unwatched, a file is unwatched when its last
    /// dependant leaves and watched when its first arrives.
    pub fn update_dependencies<I>(&mut self, module: &ModuleId, files: I) -> Result<(), WatchError>
    where
        I: IntoIterator,
        I::Item: AsRef<Path>,
    {
        let new: BTreeSet<PathBuf> = files
            .into_iter()
            .map(|file| normalize_path(file.as_ref()))
            .collect();
        let old = self.dependencies.remove(module).unwrap_or_default();
        let mut first_error = None;

        for file in old.difference(&new) {
            let Some(modules) = self.dependants.get_mut(file) else {
                continue;
            };
            modules.remove(module);
            if modules.is_empty() {
                self.dependants.remove(file);
                tracing::trace!(file = %file.display(), "unwatching");
                if let Err(error) = self.backend.unwatch(file) {
                    first_error.get_or_insert(error);
                }
            }
        }
        for file in new.difference(&old) {
            let modules = self.dependants.entry(file.clone()).or_default();
            if modules.is_empty() {
                tracing::trace!(file = %file.display(), "watching");
                if let Err(error) = self.backend.watch(file) {
                    first_error.get_or_insert(error);
                }
            }
            modules.insert(module.clone());
        }

        if !new.is_empty() {
            self.dependencies.insert(module.clone(), new);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Forget `module`, unwatching files nothing else depends on.
    pub fn remove_module(&mut self, module: &ModuleId) -> Result<(), WatchError> {
        self.update_dependencies(module, std::iter::empty::<&Path>())
    }

    /// Modules to re-run because `path` changed.
    pub fn changed(&self, path: &Path) -> BTreeSet<ModuleId> {
        self.dependants
            .get(&normalize_path(path))
            .cloned()
            .unwrap_or_default()
    }

    pub fn dependants(&self, file: &Path) -> Option<&BTreeSet<ModuleId>> {
        self.dependants.get(&normalize_path(file))
    }

    pub fn dependencies(&self, module: &ModuleId) -> Option<&BTreeSet<PathBuf>> {
        self.dependencies.get(module)
    }

    /// Files with at least one dependant.
    pub fn watched_files(&self) -> BTreeSet<&Path> {
        self.dependants.keys().map(PathBuf::as_path).collect()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests;
