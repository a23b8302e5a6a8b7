//! Multi-process worker pool for tally.
//!
//! The controller owns a [`Scheduler`] that spawns worker processes through
//! a [`WorkerLauncher`], queues modules, and folds every worker's private
//! event stream into one sequence of [`Update`]s. Each worker runs a
//! [`Worker`] loop with its own engine and never shares state with the
//! controller; the only link is the message protocol in [`protocol`].
//!
//! ```text
//! controller                               worker process
//! ──────────                               ──────────────
//! Initialize(config) ───────────────────►  resolve plugins
//!                    ◄───────────────────  WaitingForTests
//! RunTests(module)   ───────────────────►  Engine::run_module
//!                    ◄───────────────────  Event(..)*
//!                    ◄───────────────────  WaitingForTests
//! Stop               ───────────────────►  exit(0)
//! ```

mod launcher;
mod memory;
pub mod protocol;
mod scheduler;
mod worker;

pub use launcher::{ProcessLauncher, WorkerHandle, WorkerLauncher, WORKER_ADDR_ENV};
pub use memory::resident_bytes;
pub use protocol::{ControllerMessage, MessageSink, MessageSource, ProtocolError, WorkerMessage};
pub use scheduler::{PoolError, PoolEvent, RunId, RunOutcome, Scheduler, Update, WorkerId};
pub use worker::{connect, Worker};
