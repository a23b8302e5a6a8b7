//! Command line parsing.

use tally_core::{RunConfig, Verbosity};

/// Parsed command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Include and `!`-exclude module patterns.
    pub patterns: Vec<String>,
    pub config: RunConfig,
    pub help: bool,
    pub version: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CliError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),

    #[error("option `{0}` requires a value")]
    MissingValue(String),

    #[error("invalid process count `{0}`")]
    InvalidCount(String),
}

/// Parse arguments, program name excluded. Flags and patterns may be mixed.
pub fn parse_args<I>(args: I) -> Result<CliOptions, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if let Some(count) = arg.strip_prefix("--processes=") {
            options.config.concurrency = parse_count(count)?;
        } else if arg == "--processes" || arg == "-p" {
            let count = args.next().ok_or_else(|| CliError::MissingValue(arg.clone()))?;
            options.config.concurrency = parse_count(&count)?;
        } else if arg == "--in-process" {
            options.config.concurrency = 0;
        } else if arg == "--watch" || arg == "-w" {
            options.config.watch = true;
        } else if arg == "--verbose" || arg == "-v" {
            options.config.verbosity = Verbosity::Verbose;
        } else if arg == "--quiet" || arg == "-q" {
            options.config.verbosity = Verbosity::Quiet;
        } else if arg == "--show-stacks" {
            options.config.show_stacks = true;
        } else if let Some(name) = arg.strip_prefix("--plugin=") {
            options.config.plugins.push(name.to_owned());
        } else if let Some(filter) = arg.strip_prefix("--filter=") {
            options.config.filter = Some(filter.to_owned());
        } else if arg == "--help" || arg == "-h" {
            options.help = true;
        } else if arg == "--version" {
            options.version = true;
        } else if arg.starts_with('-') && arg.len() > 1 {
            return Err(CliError::UnknownOption(arg));
        } else {
            options.patterns.push(arg);
        }
    }
    Ok(options)
}

fn parse_count(value: &str) -> Result<usize, CliError> {
    value
        .parse()
        .map_err(|_| CliError::InvalidCount(value.to_owned()))
}

pub fn print_usage(program: &str) {
    println!("Usage: {program} [patterns...] [options]");
    println!();
    println!("Patterns select test modules; prefix a pattern with ! to exclude.");
    println!();
    println!("Options:");
    println!("  --processes=<n>, -p <n>  Worker processes (default: available cores)");
    println!("  --in-process             Run every module on this thread");
    println!("  --watch, -w              Re-run affected modules when files change");
    println!("  --verbose, -v            Show durations and run counts");
    println!("  --quiet, -q              Show failures and the summary only");
    println!("  --show-stacks            Print captured stacks under failures");
    println!("  --plugin=<name>          Enable a plugin (repeatable)");
    println!("  --filter=<text>          Only run top-level tests containing text");
    println!("  --help, -h               Show this help message");
    println!("  --version                Show version information");
    println!();
    println!("Environment:");
    println!("  TALLY_LOG                Log filter, e.g. tally_pool=debug (falls back to RUST_LOG)");
}

#[cfg(test)]
mod tests;
