//! Tally: a test runner for tests that declare each other by running.
//!
//! The host binary registers its test modules and plugins and hands control
//! to [`main`], which either serves as a pool worker (when spawned by a
//! controller) or parses the command line and runs a [`TestRunner`].
//!
//! ```no_run
//! use tally_core::{ModuleRegistry, PluginRegistry};
//!
//! fn main() -> std::process::ExitCode {
//!     let mut registry = ModuleRegistry::new();
//!     registry.register(file!(), |m| {
//!         m.test("arithmetic", |t| {
//!             t.test("adds", |_| assert_eq!(1 + 1, 2));
//!         });
//!     });
//!     tally::main(registry, PluginRegistry::builtin())
//! }
//! ```

pub mod cli;
mod discovery;
mod report;
mod runner;
mod summary;

pub use discovery::{select_modules, PatternError, DEFAULT_EXCLUDES};
pub use report::{ConsoleReporter, Reporter};
pub use runner::{RunnerError, TestRunner};
pub use summary::{ModuleSummary, TestOutcome, TestResult, TestSummary};

use std::io::BufRead;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::{Arc, Once};

use crossbeam::channel::{self, Receiver};
use tally_core::{ExitStatus, ModuleLoader, ModuleRegistry, PluginRegistry};
use tally_pool::{ProcessLauncher, Worker, WORKER_ADDR_ENV};

static TRACING_INIT: Once = Once::new();

/// Install the log subscriber once, if `TALLY_LOG` or `RUST_LOG` is set.
///
/// The hierarchical layer writes to stderr, so logs never interleave with
/// reporter output on stdout.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{prelude::*, EnvFilter};

        let Some(directives) = std::env::var("TALLY_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
        else {
            return;
        };
        let filter = EnvFilter::new(directives);
        tracing_subscriber::registry()
            .with(
                tracing_tree::HierarchicalLayer::new(2)
                    .with_targets(true)
                    .with_indent_lines(true)
                    .with_bracketed_fields(true),
            )
            .with(filter)
            .init();
    });
}

/// Process entry point for a binary embedding tally.
pub fn main(registry: ModuleRegistry, plugins: PluginRegistry) -> ExitCode {
    init_tracing();

    if let Ok(addr) = std::env::var(WORKER_ADDR_ENV) {
        return run_worker(&addr, registry, plugins).into();
    }

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| String::from("tally"));
    let options = match cli::parse_args(args) {
        Ok(options) => options,
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("Run `{program} --help` for usage.");
            return ExitStatus::UnexpectedError.into();
        }
    };
    if options.help {
        cli::print_usage(&program);
        return ExitStatus::Success.into();
    }
    if options.version {
        println!("tally {}", env!("CARGO_PKG_VERSION"));
        return ExitStatus::Success.into();
    }

    let modules = match select_modules(&registry, &options.patterns) {
        Ok(modules) => modules,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitStatus::UnexpectedError.into();
        }
    };
    let launcher = match ProcessLauncher::current_exe() {
        Ok(launcher) => launcher,
        Err(error) => {
            eprintln!("error: {error}");
            return ExitStatus::UnexpectedError.into();
        }
    };

    let config = options.config;
    let reporter = ConsoleReporter::stdout(config.verbosity, config.show_stacks);
    let watch = config.watch;
    let loader: Arc<dyn ModuleLoader> = Arc::new(registry);
    let mut runner = TestRunner::new(config, loader, plugins, launcher, Box::new(reporter));

    let status = if watch {
        println!("Watching for changes. Type q and press Enter to quit.");
        runner.watch(&modules, &quit_on_stdin()).map(|()| ExitStatus::Success)
    } else {
        runner.run(&modules).map(|summary| summary.exit_status())
    };
    match status {
        Ok(status) => status.into(),
        Err(error) => {
            eprintln!("error: {error}");
            error.exit_status().into()
        }
    }
}

#[tracing::instrument(level = "debug", skip_all, fields(addr = %addr))]
fn run_worker(addr: &str, registry: ModuleRegistry, plugins: PluginRegistry) -> ExitStatus {
    let addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(error) => {
            tracing::error!(%error, "invalid controller address");
            return ExitStatus::UnexpectedError;
        }
    };
    let (reader, writer) = match tally_pool::connect(addr) {
        Ok(connection) => connection,
        Err(error) => {
            tracing::error!(%error, "failed to connect to controller");
            return ExitStatus::UnexpectedError;
        }
    };
    Worker::new(Arc::new(registry), plugins).serve(reader, writer)
}

/// Fires once stdin reads `q` or reaches end of input.
fn quit_on_stdin() -> Receiver<()> {
    let (stop, stopped) = channel::bounded(1);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == "q" => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = stop.send(());
    });
    stopped
}
