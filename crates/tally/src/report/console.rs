use std::io::{self, Write};

use tally_core::{ModuleId, TestError, Verbosity};

use super::Reporter;
use crate::summary::{ModuleSummary, TestOutcome, TestResult, TestSummary};

/// Human-readable output: one indented tree per module and a final summary.
pub struct ConsoleReporter<W: Write = io::Stdout> {
    out: W,
    verbosity: Verbosity,
    show_stacks: bool,
}

impl ConsoleReporter {
    pub fn stdout(verbosity: Verbosity, show_stacks: bool) -> Self {
        ConsoleReporter::new(io::stdout(), verbosity, show_stacks)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, verbosity: Verbosity, show_stacks: bool) -> Self {
        ConsoleReporter {
            out,
            verbosity,
            show_stacks,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_result(&mut self, result: &TestResult) -> io::Result<()> {
        let quiet = self.verbosity == Verbosity::Quiet;
        // Quiet output has no tree to hang names on.
        let (indent, name) = if quiet {
            (String::from("  "), result.path.join(" > "))
        } else {
            ("  ".repeat(result.depth() + 1), result.name().to_owned())
        };
        let timing = if self.verbosity == Verbosity::Verbose {
            format!(" ({:.2?}, {} runs)", result.duration, result.run_count)
        } else {
            String::new()
        };

        match &result.outcome {
            TestOutcome::Passed => writeln!(self.out, "{indent}\u{2713} {name}{timing}"),
            TestOutcome::Group => writeln!(self.out, "{indent}{name}{timing}"),
            TestOutcome::Skipped => writeln!(self.out, "{indent}- {name} (skipped)"),
            TestOutcome::Failed(error) => {
                writeln!(self.out, "{indent}\u{2717} {name} - {}{timing}", error.message)?;
                self.write_stack(&indent, error)
            }
        }
    }

    fn write_stack(&mut self, indent: &str, error: &TestError) -> io::Result<()> {
        let Some(stack) = error.stack.as_deref().filter(|_| self.show_stacks) else {
            return Ok(());
        };
        for line in stack.lines() {
            writeln!(self.out, "{indent}    {line}")?;
        }
        Ok(())
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn run_started(&mut self, modules: &[ModuleId]) -> io::Result<()> {
        if self.verbosity == Verbosity::Verbose {
            writeln!(self.out, "Running {} modules", modules.len())?;
        }
        Ok(())
    }

    fn module_completed(&mut self, summary: &ModuleSummary) -> io::Result<()> {
        if self.verbosity == Verbosity::Quiet {
            if !summary.has_failures() {
                return Ok(());
            }
            writeln!(self.out, "\n{}", summary.module)?;
            for result in summary.failures() {
                self.write_result(result)?;
            }
            return self.out.flush();
        }

        writeln!(self.out, "\n{}", summary.module)?;
        for result in &summary.results {
            self.write_result(result)?;
        }
        self.out.flush()
    }

    fn run_completed(&mut self, summary: &TestSummary) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "Test Summary:")?;
        writeln!(
            self.out,
            "  {} passed, {} failed, {} skipped ({} total)",
            summary.passed,
            summary.failed,
            summary.skipped,
            summary.total()
        )?;
        for module in &summary.incomplete {
            writeln!(self.out, "  INCOMPLETE: {module}")?;
        }
        writeln!(self.out, "  Completed in {:.2?}", summary.duration)?;

        writeln!(self.out)?;
        if summary.has_failures() {
            writeln!(self.out, "FAILED")?;
        } else if summary.total() == 0 {
            writeln!(self.out, "NO TESTS FOUND")?;
        } else {
            writeln!(self.out, "OK")?;
        }
        self.out.flush()
    }
}
