//! Run Coordinator.
//!
//! Owns the scheduler (or, with zero concurrency, an engine on the calling
//! thread), the Test Info Model and a reporter, and drives them in
//! run-once or watch mode.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};
use tally_core::{
    catch_panic, Engine, ExitStatus, ModuleId, ModuleLoader, PluginError, PluginRegistry,
    RunConfig, TestEvent, TestInfoModel,
};
use tally_pool::{PoolError, ProcessLauncher, RunId, RunOutcome, Scheduler, Update, WorkerLauncher};
use tally_watch::{Debouncer, DependencyWatcher, NotifyBackend, WatchBackend, WatchError};

use crate::report::Reporter;
use crate::summary::{ModuleSummary, TestSummary};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("failed to write report: {0}")]
    Report(#[from] std::io::Error),
}

impl RunnerError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            RunnerError::Plugin(_) | RunnerError::Pool(PoolError::Aborted) => {
                ExitStatus::PluginLoadError
            }
            _ => ExitStatus::UnexpectedError,
        }
    }
}

/// Drives test modules to completion and reports what happened.
pub struct TestRunner<L: WorkerLauncher = ProcessLauncher> {
    config: RunConfig,
    loader: Arc<dyn ModuleLoader>,
    plugins: PluginRegistry,
    scheduler: Scheduler<L>,
    model: TestInfoModel,
    reporter: Box<dyn Reporter>,
    debounce: Duration,
}

/// Bookkeeping for runs submitted to the pool and not yet resolved.
#[derive(Default)]
struct Inflight {
    started: BTreeMap<RunId, Instant>,
    aborted: bool,
}

impl<L: WorkerLauncher> TestRunner<L> {
    pub fn new(
        config: RunConfig,
        loader: Arc<dyn ModuleLoader>,
        plugins: PluginRegistry,
        launcher: L,
        reporter: Box<dyn Reporter>,
    ) -> Self {
        let scheduler = Scheduler::new(config.clone(), launcher);
        TestRunner {
            config,
            loader,
            plugins,
            scheduler,
            model: TestInfoModel::new(),
            reporter,
            debounce: tally_watch::DEFAULT_DEBOUNCE,
        }
    }

    /// Window within which watch-mode changes coalesce into one run.
    #[must_use]
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn model(&self) -> &TestInfoModel {
        &self.model
    }

    /// Run `modules` once and summarize them.
    #[tracing::instrument(level = "debug", skip_all, fields(modules = modules.len()))]
    pub fn run(&mut self, modules: &[ModuleId]) -> Result<TestSummary, RunnerError> {
        let started = Instant::now();
        self.reporter.run_started(modules)?;

        if self.config.is_in_process() {
            let summary = self.run_in_process(modules, started, None::<&mut DependencyWatcher>)?;
            return Ok(summary);
        }

        let mut inflight = Inflight::default();
        let id = self.scheduler.submit(modules.to_vec())?;
        inflight.started.insert(id, started);

        let mut summary = None;
        while let Some(update) = self.scheduler.next_update() {
            if let Some(done) =
                self.apply(update, &mut inflight, None::<&mut DependencyWatcher>)?
            {
                summary = Some(done);
            }
        }
        if inflight.aborted {
            return Err(PoolError::Aborted.into());
        }
        // The pool drained without resolving the run; nothing reported back.
        Ok(summary.unwrap_or_else(|| {
            TestSummary::from_model(&self.model, modules, modules)
        }))
    }

    /// Watch with the native file-system backend until `stop` fires.
    pub fn watch(&mut self, modules: &[ModuleId], stop: &Receiver<()>) -> Result<(), RunnerError> {
        let (backend, changes) = NotifyBackend::channel();
        self.watch_with(modules, backend, &changes, stop)
    }

    /// Run `modules`, then keep re-running whichever of them a change on
    /// `changes` affects, until `stop` fires or disconnects.
    ///
    /// The initial run goes through the debouncer like any change. Runs
    /// may overlap; each reports its own summary as it completes.
    #[tracing::instrument(level = "debug", skip_all, fields(modules = modules.len()))]
    pub fn watch_with<B: WatchBackend>(
        &mut self,
        modules: &[ModuleId],
        backend: B,
        changes: &Receiver<PathBuf>,
        stop: &Receiver<()>,
    ) -> Result<(), RunnerError> {
        let mut watcher = DependencyWatcher::new(backend);
        watcher.start()?;
        let mut debouncer = Debouncer::new(self.debounce);
        debouncer.push(modules.iter().cloned(), Instant::now());
        let events = self.scheduler.events().clone();
        let mut inflight = Inflight::default();

        let result = loop {
            let deadline = debouncer
                .deadline()
                .map_or_else(channel::never, channel::at);
            crossbeam::select! {
                recv(stop) -> _ => break Ok(()),
                recv(changes) -> path => {
                    let Ok(path) = path else {
                        tracing::warn!("file watcher disconnected");
                        break Ok(());
                    };
                    let affected = watcher.changed(&path);
                    if !affected.is_empty() {
                        tracing::debug!(file = %path.display(), modules = affected.len(), "change detected");
                        debouncer.push(affected, Instant::now());
                    }
                }
                recv(deadline) -> _ => {
                    let Some(modules) = debouncer.take_ready(Instant::now()) else {
                        continue;
                    };
                    if let Err(error) = self.start_run(&modules, &mut inflight, &mut watcher) {
                        break Err(error);
                    }
                }
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.scheduler.handle(event);
                    }
                    if let Err(error) = self.pump(&mut inflight, &mut watcher) {
                        break Err(error);
                    }
                    if inflight.aborted {
                        break Err(PoolError::Aborted.into());
                    }
                }
            }
        };

        watcher.stop();
        self.scheduler.shutdown();
        while let Some(update) = self.scheduler.next_update() {
            self.apply(update, &mut inflight, None::<&mut DependencyWatcher>)?;
        }
        result
    }

    fn start_run<B: WatchBackend>(
        &mut self,
        modules: &[ModuleId],
        inflight: &mut Inflight,
        watcher: &mut DependencyWatcher<B>,
    ) -> Result<(), RunnerError> {
        let started = Instant::now();
        self.reporter.run_started(modules)?;
        if self.config.is_in_process() {
            self.run_in_process(modules, started, Some(watcher))?;
            return Ok(());
        }
        let id = self.scheduler.submit(modules.to_vec())?;
        inflight.started.insert(id, started);
        self.pump(inflight, watcher)
    }

    /// Apply every update the scheduler has ready.
    fn pump<B: WatchBackend>(
        &mut self,
        inflight: &mut Inflight,
        watcher: &mut DependencyWatcher<B>,
    ) -> Result<(), RunnerError> {
        while let Some(update) = self.scheduler.poll() {
            self.apply(update, inflight, Some(&mut *watcher))?;
        }
        Ok(())
    }

    /// Fold one scheduler update in. Returns the summary of a run it
    /// completed.
    fn apply<B: WatchBackend>(
        &mut self,
        update: Update,
        inflight: &mut Inflight,
        watcher: Option<&mut DependencyWatcher<B>>,
    ) -> Result<Option<TestSummary>, RunnerError> {
        match update {
            Update::Event { worker, event } => {
                tracing::trace!(%worker, module = %event.module(), "event");
                self.observe(&event, watcher)?;
                Ok(None)
            }
            Update::RunCompleted(RunOutcome {
                id,
                modules,
                incomplete,
            }) => {
                let started = inflight.started.remove(&id).unwrap_or_else(Instant::now);
                let mut summary = TestSummary::from_model(&self.model, &modules, &incomplete);
                summary.duration = started.elapsed();
                self.reporter.run_completed(&summary)?;
                Ok(Some(summary))
            }
            Update::RunAborted { id } => {
                tracing::error!(run = id.0, "run aborted by a plugin failure");
                inflight.started.remove(&id);
                inflight.aborted = true;
                Ok(None)
            }
        }
    }

    /// Run `modules` on this thread with a fresh engine.
    fn run_in_process<B: WatchBackend>(
        &mut self,
        modules: &[ModuleId],
        started: Instant,
        mut watcher: Option<&mut DependencyWatcher<B>>,
    ) -> Result<TestSummary, RunnerError> {
        let pipeline = self.plugins.pipeline(&self.config)?;
        let (sender, receiver) = channel::unbounded();
        let mut engine = Engine::new(pipeline, Arc::clone(&self.loader), move |event| {
            // The receiver outlives the engine.
            let _ = sender.send(event);
        });

        let mut incomplete = Vec::new();
        let mut seen = BTreeSet::new();
        for module in modules {
            if !seen.insert(module) {
                continue;
            }
            if let Err(error) = catch_panic(|| engine.run_module(module)) {
                tracing::error!(%module, %error, "module aborted");
                incomplete.push(module.clone());
            }
            for event in receiver.try_iter() {
                self.observe(&event, watcher.as_deref_mut())?;
            }
        }
        if let Err(error) = catch_panic(|| engine.finish()) {
            tracing::error!(%error, "finally hook panicked");
        }
        for event in receiver.try_iter() {
            self.observe(&event, watcher.as_deref_mut())?;
        }

        let mut summary = TestSummary::from_model(&self.model, modules, &incomplete);
        summary.duration = started.elapsed();
        self.reporter.run_completed(&summary)?;
        Ok(summary)
    }

    /// Feed one event to the model, the reporter and the watcher.
    fn observe<B: WatchBackend>(
        &mut self,
        event: &TestEvent,
        watcher: Option<&mut DependencyWatcher<B>>,
    ) -> Result<(), RunnerError> {
        let touched = match self.model.update(event) {
            Ok(touched) => touched,
            Err(error) => {
                tracing::warn!(%error, "dropping event");
                return Ok(());
            }
        };
        match event {
            TestEvent::ModuleStarted { module } => self.reporter.module_started(module)?,
            TestEvent::ModuleCompleted {
                module,
                dependencies,
            } => {
                if let Some(tree) = self.model.module_tree(module) {
                    self.reporter
                        .module_completed(&ModuleSummary::from_tree(tree))?;
                }
                if let Some(watcher) = watcher {
                    track(watcher, module, dependencies);
                }
            }
            TestEvent::TestRun { module, .. } => {
                let test = touched.zip(self.model.module_tree(module));
                if let Some((id, tree)) = test {
                    let view = tree.view(id);
                    if view.has_completed() {
                        self.reporter.test_completed(view)?;
                    }
                }
            }
            TestEvent::TestCollected { .. } => {}
        }
        Ok(())
    }
}

/// Point the watcher at the files `module` was built from, its own source
/// included when it exists on disk.
fn track<B: WatchBackend>(
    watcher: &mut DependencyWatcher<B>,
    module: &ModuleId,
    dependencies: &[PathBuf],
) {
    let mut files: Vec<&Path> = dependencies.iter().map(PathBuf::as_path).collect();
    if module.as_path().is_file() {
        files.push(module.as_path());
    }
    if let Err(error) = watcher.update_dependencies(module, files) {
        tracing::warn!(%module, %error, "failed to watch dependencies");
    }
}

#[cfg(test)]
mod tests;
