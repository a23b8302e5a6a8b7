//! Watch-mode support for tally.
//!
//! [`DependencyWatcher`] keeps a reverse index from source files to the
//! test modules built from them and keeps the OS watches in sync with it.
//! [`Debouncer`] coalesces bursts of affected modules into single run
//! requests.

mod backend;
mod debounce;
mod watcher;

pub use backend::{NotifyBackend, WatchBackend};
pub use debounce::{Debouncer, DEFAULT_DEBOUNCE};
pub use watcher::{normalize_path, DependencyWatcher};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to start file watcher: {0}")]
    Start(#[source] notify::Error),

    #[error("failed to watch `{}`: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to stop watching `{}`: {source}", path.display())]
    Unwatch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}
