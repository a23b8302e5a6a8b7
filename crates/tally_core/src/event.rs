//! Lifecycle events.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ModuleId, TestError};

/// One step of test collection or execution progress.
///
/// Events are the only thing that crosses a thread or process boundary.
/// Within one module, `TestCollected` for a path always precedes any
/// `TestRun` for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TestEvent {
    ModuleStarted {
        module: ModuleId,
    },
    ModuleCompleted {
        module: ModuleId,
        /// Files the module was loaded from, for the dependency watcher.
        dependencies: Vec<PathBuf>,
    },
    TestCollected {
        module: ModuleId,
        /// Ancestor names, excluding `name`.
        path: Vec<String>,
        name: String,
    },
    TestRun {
        module: ModuleId,
        /// Ancestor names followed by the test's own name.
        path: Vec<String>,
        /// Cumulative across runs.
        duration: Duration,
        error: Option<TestError>,
    },
}

impl TestEvent {
    pub fn module(&self) -> &ModuleId {
        match self {
            TestEvent::ModuleStarted { module }
            | TestEvent::ModuleCompleted { module, .. }
            | TestEvent::TestCollected { module, .. }
            | TestEvent::TestRun { module, .. } => module,
        }
    }
}
