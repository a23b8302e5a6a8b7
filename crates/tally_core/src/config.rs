//! Run configuration.

use serde::{Deserialize, Serialize};

/// Resident memory a worker may reach before it retires itself.
pub const DEFAULT_MEMORY_LIMIT: u64 = 1 << 30;

/// How much the reporters print.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verbosity {
    /// Failures and the final summary only.
    Quiet,
    #[default]
    Normal,
    /// Also durations and run counts.
    Verbose,
}

/// Immutable snapshot of one run's settings.
///
/// Owned by the coordinator and sent by value to every worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Worker process count. Zero runs everything on the calling thread.
    pub concurrency: usize,
    pub verbosity: Verbosity,
    /// Print captured stacks under failures.
    pub show_stacks: bool,
    pub watch: bool,
    /// Plugin names, resolved against the host's plugin registry.
    pub plugins: Vec<String>,
    /// Only top-level tests whose name contains this text are collected.
    pub filter: Option<String>,
    pub memory_limit: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            concurrency: std::thread::available_parallelism().map_or(1, usize::from),
            verbosity: Verbosity::Normal,
            show_stacks: false,
            watch: false,
            plugins: Vec::new(),
            filter: None,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl RunConfig {
    /// Configuration for a synchronous, single-threaded run.
    pub fn in_process() -> Self {
        RunConfig {
            concurrency: 0,
            ..RunConfig::default()
        }
    }

    pub fn is_in_process(&self) -> bool {
        self.concurrency == 0
    }
}
