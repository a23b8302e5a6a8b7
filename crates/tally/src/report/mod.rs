//! Reporters consume what the coordinator observed, outside the execution
//! boundary.

mod console;

pub use console::ConsoleReporter;

use std::io;

use tally_core::{ModuleId, TestView};

use crate::{ModuleSummary, TestSummary};

/// Receives run progress from the [`TestRunner`](crate::TestRunner).
///
/// Every notification is driven off the Test Info Model, never off a live
/// engine, so a reporter sees the same thing in-process and across workers.
pub trait Reporter {
    /// A run of `modules` was requested.
    fn run_started(&mut self, _modules: &[ModuleId]) -> io::Result<()> {
        Ok(())
    }

    fn module_started(&mut self, _module: &ModuleId) -> io::Result<()> {
        Ok(())
    }

    /// A run of `test` left it completed. Fires again on every later run.
    fn test_completed(&mut self, _test: TestView<'_>) -> io::Result<()> {
        Ok(())
    }

    fn module_completed(&mut self, summary: &ModuleSummary) -> io::Result<()>;

    fn run_completed(&mut self, summary: &TestSummary) -> io::Result<()>;
}
