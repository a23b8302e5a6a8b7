//! End-to-end runs of the demo binary.

#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use std::process::{Command, Output};

use pretty_assertions::assert_eq;
use tally_core::ExitStatus;

fn demo(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tally-demo"))
        .args(args)
        .env_remove("TALLY_WORKER_ADDR")
        .env_remove("TALLY_DEMO_FIXTURE")
        .output()
        .unwrap()
}

fn status(output: &Output) -> Option<ExitStatus> {
    output.status.code().and_then(ExitStatus::from_code)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn passing_module_succeeds_in_both_modes() {
    for mode in ["--in-process", "--processes=2"] {
        let output = demo(&["**/math.rs", mode]);
        let text = stdout(&output);
        assert_eq!(status(&output), Some(ExitStatus::Success), "{mode}: {text}");
        assert!(text.contains("  8 passed, 0 failed, 0 skipped (8 total)"), "{mode}: {text}");
        assert!(text.trim_end().ends_with("OK"), "{mode}: {text}");
    }
}

#[test]
fn failures_fail_the_run_in_both_modes() {
    for mode in ["--in-process", "--processes=2"] {
        let output = demo(&[mode]);
        let text = stdout(&output);
        assert_eq!(status(&output), Some(ExitStatus::TestsFailed), "{mode}: {text}");
        assert!(text.contains("pads to width - expected `ab  `, found `  ab`"), "{mode}: {text}");
        assert!(text.contains("TALLY_DEMO_FIXTURE is not set"), "{mode}: {text}");
        assert!(text.contains("  10 passed, 2 failed, 0 skipped (12 total)"), "{mode}: {text}");
        assert!(text.trim_end().ends_with("FAILED"), "{mode}: {text}");
    }
}

#[test]
fn unknown_plugin_is_a_load_error_in_both_modes() {
    for mode in ["--in-process", "--processes=2"] {
        let output = demo(&["--plugin=nope", mode]);
        assert_eq!(status(&output), Some(ExitStatus::PluginLoadError), "{mode}");
    }
}

#[test]
fn filter_limits_top_level_tests() {
    let output = demo(&["**/math.rs", "--in-process", "--filter=gcd"]);
    let text = stdout(&output);
    assert_eq!(status(&output), Some(ExitStatus::Success), "{text}");
    assert!(text.contains("  5 passed, 0 failed, 0 skipped (5 total)"), "{text}");
    assert!(!text.contains("arithmetic"), "{text}");
}

#[test]
fn usage_errors_and_help() {
    assert_eq!(
        status(&demo(&["--bogus"])),
        Some(ExitStatus::UnexpectedError)
    );
    let help = demo(&["--help"]);
    assert_eq!(status(&help), Some(ExitStatus::Success));
    assert!(stdout(&help).contains("--processes=<n>"));
}
