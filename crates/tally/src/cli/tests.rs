#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use super::*;
use pretty_assertions::assert_eq;

fn parse(args: &[&str]) -> Result<CliOptions, CliError> {
    parse_args(args.iter().map(|arg| (*arg).to_owned()))
}

#[test]
fn defaults_without_arguments() {
    let options = parse(&[]).unwrap();
    assert_eq!(options.config, RunConfig::default());
    assert!(options.patterns.is_empty());
}

#[test]
fn flags_and_patterns_mix() {
    let options = parse(&[
        "src/**",
        "-p",
        "3",
        "--watch",
        "!**/slow.rs",
        "--plugin=slow-tests",
        "--plugin=coverage",
        "--filter=math",
        "-q",
        "--show-stacks",
    ])
    .unwrap();

    assert_eq!(options.patterns, vec!["src/**", "!**/slow.rs"]);
    assert_eq!(options.config.concurrency, 3);
    assert!(options.config.watch);
    assert!(options.config.show_stacks);
    assert_eq!(options.config.plugins, vec!["slow-tests", "coverage"]);
    assert_eq!(options.config.filter.as_deref(), Some("math"));
    assert_eq!(options.config.verbosity, Verbosity::Quiet);
}

#[test]
fn in_process_overrides_count() {
    let options = parse(&["--processes=4", "--in-process"]).unwrap();
    assert!(options.config.is_in_process());
}

#[test]
fn rejects_bad_input() {
    assert_eq!(
        parse(&["--bogus"]).unwrap_err(),
        CliError::UnknownOption("--bogus".to_owned())
    );
    assert_eq!(
        parse(&["-p"]).unwrap_err(),
        CliError::MissingValue("-p".to_owned())
    );
    assert_eq!(
        parse(&["--processes=many"]).unwrap_err(),
        CliError::InvalidCount("many".to_owned())
    );
}

#[test]
fn help_and_version() {
    let options = parse(&["-h", "--version"]).unwrap();
    assert!(options.help);
    assert!(options.version);
}
