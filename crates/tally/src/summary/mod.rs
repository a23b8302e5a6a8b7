//! Run summaries.

use std::time::Duration;

use tally_core::{ExitStatus, ModuleId, TestError, TestInfoModel, TestTree};

/// Outcome of a single test node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(TestError),
    /// Declared but never executed, e.g. under a parent that failed first.
    Skipped,
    /// Has nested tests and no failure of its own; its outcome is theirs.
    Group,
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TestOutcome::Skipped)
    }
}

/// One node of a module, in depth-first declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResult {
    /// Ancestor names followed by the node's own name.
    pub path: Vec<String>,
    pub outcome: TestOutcome,
    pub run_count: u32,
    pub duration: Duration,
}

impl TestResult {
    pub fn name(&self) -> &str {
        self.path.last().map_or("", String::as_str)
    }

    /// Nesting level, zero for top-level tests.
    pub fn depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Summary of one module's tests.
///
/// Leaves are counted; a group only counts when it failed itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleSummary {
    pub module: ModuleId,
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Sum of the top-level tests' durations.
    pub duration: Duration,
}

impl ModuleSummary {
    pub fn new(module: ModuleId) -> Self {
        ModuleSummary {
            module,
            ..Default::default()
        }
    }

    pub fn from_tree(tree: &TestTree) -> Self {
        let mut summary = ModuleSummary::new(tree.module().clone());
        for test in tree.iter() {
            let outcome = match test.error() {
                Some(error) => TestOutcome::Failed(error.clone()),
                None if !test.is_leaf() => TestOutcome::Group,
                None if test.run_count() == 0 => TestOutcome::Skipped,
                None => TestOutcome::Passed,
            };
            if test.depth() == 0 {
                summary.duration += test.duration();
            }
            summary.add_result(TestResult {
                path: test.full_name(),
                outcome,
                run_count: test.run_count(),
                duration: test.duration(),
            });
        }
        summary
    }

    pub fn add_result(&mut self, result: TestResult) {
        match &result.outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed(_) => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::Group => {}
        }
        self.results.push(result);
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Failed nodes only, in declaration order.
    pub fn failures(&self) -> impl Iterator<Item = &TestResult> + '_ {
        self.results.iter().filter(|result| result.outcome.is_failed())
    }
}

/// Overall summary of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub modules: Vec<ModuleSummary>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Modules without results: their worker died, or they never started.
    pub incomplete: Vec<ModuleId>,
    /// Wall-clock time of the run.
    pub duration: Duration,
}

impl TestSummary {
    pub fn new() -> Self {
        TestSummary::default()
    }

    /// Summarize `modules` from what `model` has seen of them.
    pub fn from_model(model: &TestInfoModel, modules: &[ModuleId], incomplete: &[ModuleId]) -> Self {
        let mut summary = TestSummary::new();
        for module in modules {
            match model.module_tree(module) {
                Some(tree) if model.is_module_complete(module) && !incomplete.contains(module) => {
                    summary.add_module(ModuleSummary::from_tree(tree));
                }
                _ => summary.mark_incomplete(module.clone()),
            }
        }
        summary
    }

    pub fn add_module(&mut self, summary: ModuleSummary) {
        self.passed += summary.passed;
        self.failed += summary.failed;
        self.skipped += summary.skipped;
        self.modules.push(summary);
    }

    pub fn mark_incomplete(&mut self, module: ModuleId) {
        if !self.incomplete.contains(&module) {
            self.incomplete.push(module);
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || !self.incomplete.is_empty()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.has_failures() {
            ExitStatus::TestsFailed
        } else {
            ExitStatus::Success
        }
    }
}
