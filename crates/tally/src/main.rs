//! Demo suite for tally.
//!
//! `tally-demo --help` lists the options; `tally-demo '**/math.rs'` runs a
//! passing module, and a bare `tally-demo` includes a failing test and a
//! module that fails to load.

mod demo;

use std::process::ExitCode;

use tally_core::PluginRegistry;

fn main() -> ExitCode {
    tally::main(demo::registry(), PluginRegistry::builtin())
}
