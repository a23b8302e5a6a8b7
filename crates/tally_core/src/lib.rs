//! Core of the tally test engine.
//!
//! A test module is a function that declares tests. Tests are declared and
//! executed by the same call: the first time a name is seen at a position it
//! is collected, and on later passes the declaration re-enters it. The
//! [`Engine`] keeps re-invoking top-level bodies until every nested test has
//! run exactly once.
//!
//! # Architecture
//!
//! ```text
//! ModuleLoader ──► Engine ──► Pipeline (middleware ... core) ──► TestTree
//!                    │
//!                    ▼
//!               TestEvent stream ──► TestInfoModel (outside the worker)
//! ```
//!
//! Everything that crosses a thread or process boundary is a [`TestEvent`].

mod config;
mod engine;
mod error;
mod event;
mod exit;
mod loader;
mod middleware;
mod model;
mod panic;
mod plugin;
mod tree;

pub use config::{RunConfig, Verbosity, DEFAULT_MEMORY_LIMIT};
pub use engine::{Context, Engine, ModuleScope, Scope};
pub use error::{Outcome, PluginError, TestError};
pub use event::TestEvent;
pub use exit::ExitStatus;
pub use loader::{ModuleEntry, ModuleLoader, ModuleRegistry};
pub use middleware::{
    Collect, Finally, Hook, NameFilter, Next, Pipeline, Run, RunModule, TestMiddleware,
};
pub use model::{ModelError, TestInfoModel};
pub use panic::catch as catch_panic;
pub use plugin::{PluginRegistry, SlowTests};
pub use tree::{ModuleId, NodeId, TestNode, TestTree, TestView};
