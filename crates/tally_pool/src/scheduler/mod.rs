//! Worker Pool Scheduler.
//!
//! Pure state machine driven by [`PoolEvent`]s: nothing here blocks except
//! [`Scheduler::next_update`]. Callers that multiplex other inputs select on
//! [`Scheduler::events`] and feed what they receive to [`Scheduler::handle`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tally_core::{ExitStatus, ModuleId, RunConfig, TestEvent};

use crate::protocol::{ControllerMessage, ProtocolError, WorkerMessage};
use crate::{ProcessLauncher, WorkerHandle, WorkerLauncher};

/// Workers in a row that may die before asking for work before the pool
/// stops replacing them.
const MAX_STARTUP_FAILURES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker did not connect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("worker exited before connecting (exit code {0:?})")]
    ExitedEarly(Option<i32>),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("runs were aborted because a plugin failed to load")]
    Aborted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one [`Scheduler::submit`] request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

/// Something a worker did.
#[derive(Clone, Debug, PartialEq)]
pub enum PoolEvent {
    Message {
        worker: WorkerId,
        message: WorkerMessage,
    },
    /// The worker is gone. `code` is `None` when it was killed by a signal.
    Exited { worker: WorkerId, code: Option<i32> },
}

/// Result of one submitted run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub id: RunId,
    pub modules: Vec<ModuleId>,
    /// Modules whose worker died before finishing them.
    pub incomplete: Vec<ModuleId>,
}

/// Output of the scheduler, in the order it became known.
#[derive(Clone, Debug, PartialEq)]
pub enum Update {
    Event { worker: WorkerId, event: TestEvent },
    RunCompleted(RunOutcome),
    /// A plugin failed to load; the run will never complete.
    RunAborted { id: RunId },
}

struct WorkerSlot {
    handle: Box<dyn WorkerHandle>,
    /// Sent `WaitingForTests` and has not been given a module since.
    ready: bool,
    /// Has sent `WaitingForTests` at least once.
    started: bool,
    stopping: bool,
}

struct PendingRun {
    id: RunId,
    modules: Vec<ModuleId>,
    incomplete: Vec<ModuleId>,
}

/// Distributes test modules over a pool of isolated workers.
pub struct Scheduler<L: WorkerLauncher = ProcessLauncher> {
    config: RunConfig,
    launcher: L,
    sender: Sender<PoolEvent>,
    receiver: Receiver<PoolEvent>,
    next_worker: u32,
    next_run: u64,
    queue: VecDeque<ModuleId>,
    workers: BTreeMap<WorkerId, WorkerSlot>,
    assignments: BTreeMap<WorkerId, ModuleId>,
    runs: Vec<PendingRun>,
    updates: VecDeque<Update>,
    startup_failures: u32,
    aborted: bool,
}

impl<L: WorkerLauncher> Scheduler<L> {
    pub fn new(config: RunConfig, launcher: L) -> Self {
        let (sender, receiver) = channel::unbounded();
        Scheduler {
            config,
            launcher,
            sender,
            receiver,
            next_worker: 0,
            next_run: 0,
            queue: VecDeque::new(),
            workers: BTreeMap::new(),
            assignments: BTreeMap::new(),
            runs: Vec::new(),
            updates: VecDeque::new(),
            startup_failures: 0,
            aborted: false,
        }
    }

    /// Request a run of `modules`.
    ///
    /// Modules already waiting in the queue are not queued twice. The pool
    /// grows to `min(concurrency, modules requested)` workers.
    #[tracing::instrument(level = "debug", skip_all, fields(modules = modules.len()))]
    pub fn submit(&mut self, modules: Vec<ModuleId>) -> Result<RunId, PoolError> {
        if self.aborted {
            return Err(PoolError::Aborted);
        }
        let id = RunId(self.next_run);
        self.next_run += 1;

        let mut requested = Vec::with_capacity(modules.len());
        for module in modules {
            if !requested.contains(&module) {
                requested.push(module);
            }
        }
        for module in &requested {
            if !self.queue.contains(module) {
                self.queue.push_back(module.clone());
            }
        }
        self.startup_failures = 0;
        let wanted = self.config.concurrency.max(1).min(requested.len());
        self.runs.push(PendingRun {
            id,
            modules: requested,
            incomplete: Vec::new(),
        });

        while self.live_workers() < wanted {
            self.spawn()?;
        }
        self.dispatch();
        self.resolve_runs();
        Ok(id)
    }

    /// Apply one event received from [`Scheduler::events`].
    pub fn handle(&mut self, event: PoolEvent) {
        match event {
            PoolEvent::Message {
                worker,
                message: WorkerMessage::WaitingForTests,
            } => {
                self.assignments.remove(&worker);
                if let Some(slot) = self.workers.get_mut(&worker) {
                    slot.ready = true;
                    if !slot.started {
                        slot.started = true;
                        self.startup_failures = 0;
                    }
                }
                self.dispatch();
            }
            PoolEvent::Message {
                worker,
                message: WorkerMessage::Event(event),
            } => {
                if let TestEvent::ModuleCompleted { module, .. } = &event {
                    if self.assignments.get(&worker) == Some(module) {
                        self.assignments.remove(&worker);
                    }
                }
                self.updates.push_back(Update::Event { worker, event });
            }
            PoolEvent::Exited { worker, code } => self.worker_exited(worker, code),
        }
        self.resolve_runs();
    }

    /// Next update, blocking on worker events while any worker is alive.
    ///
    /// Returns `None` once nothing further can happen.
    pub fn next_update(&mut self) -> Option<Update> {
        loop {
            if let Some(update) = self.updates.pop_front() {
                return Some(update);
            }
            if self.workers.is_empty() {
                return None;
            }
            // We hold a sender ourselves, so this only fails if the channel
            // is torn down, which cannot happen while `self` is alive.
            let event = self.receiver.recv().ok()?;
            self.handle(event);
        }
    }

    /// Take an already computed update without blocking.
    pub fn poll(&mut self) -> Option<Update> {
        self.updates.pop_front()
    }

    /// Raw worker events, for use with `crossbeam::select!`.
    pub fn events(&self) -> &Receiver<PoolEvent> {
        &self.receiver
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Modules currently running, by worker.
    pub fn assignments(&self) -> impl Iterator<Item = (WorkerId, &ModuleId)> + '_ {
        self.assignments.iter().map(|(&worker, module)| (worker, module))
    }

    pub fn queued(&self) -> impl Iterator<Item = &ModuleId> + '_ {
        self.queue.iter()
    }

    /// Runs submitted and neither completed nor aborted.
    pub fn pending_runs(&self) -> usize {
        self.runs.len()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Ask every worker to exit once idle.
    pub fn shutdown(&mut self) {
        self.queue.clear();
        for (&worker, slot) in &mut self.workers {
            if !slot.stopping {
                stop(worker, slot);
            }
        }
    }

    fn live_workers(&self) -> usize {
        self.workers.values().filter(|slot| !slot.stopping).count()
    }

    fn spawn(&mut self) -> Result<WorkerId, PoolError> {
        let worker = WorkerId(self.next_worker);
        self.next_worker += 1;
        let mut handle = self
            .launcher
            .launch(worker, &self.config, self.sender.clone())?;
        handle.send(&ControllerMessage::Initialize(self.config.clone()))?;
        tracing::debug!(%worker, pid = ?handle.pid(), "worker started");
        self.workers.insert(
            worker,
            WorkerSlot {
                handle,
                ready: false,
                started: false,
                stopping: false,
            },
        );
        Ok(worker)
    }

    /// Give every idle worker the next module, or dismiss it.
    fn dispatch(&mut self) {
        for (&worker, slot) in &mut self.workers {
            if !slot.ready || slot.stopping {
                continue;
            }
            if self.aborted {
                stop(worker, slot);
                continue;
            }
            let Some(module) = self.queue.pop_front() else {
                if !self.config.watch {
                    stop(worker, slot);
                }
                continue;
            };
            tracing::debug!(%worker, %module, "assigning module");
            slot.ready = false;
            if let Err(error) = slot.handle.send(&ControllerMessage::RunTests {
                module: module.clone(),
            }) {
                // The worker's exit will report the module incomplete.
                tracing::warn!(%worker, %module, %error, "failed to assign module");
            }
            self.assignments.insert(worker, module);
        }
    }

    fn worker_exited(&mut self, worker: WorkerId, code: Option<i32>) {
        let Some(slot) = self.workers.remove(&worker) else {
            return;
        };
        let assigned = self.assignments.remove(&worker);
        match code.and_then(ExitStatus::from_code) {
            Some(ExitStatus::PluginLoadError) => {
                tracing::error!(%worker, "worker failed to load plugins, aborting runs");
                self.abort();
                return;
            }
            Some(ExitStatus::Success) if assigned.is_none() => {
                tracing::debug!(%worker, "worker stopped");
                return;
            }
            Some(ExitStatus::ExceededMemoryLimit) => {
                tracing::debug!(%worker, "worker retired after exceeding its memory limit");
            }
            _ => tracing::warn!(%worker, ?code, module = ?assigned, "worker crashed"),
        }

        if let Some(module) = assigned {
            for run in &mut self.runs {
                if run.modules.contains(&module) && !run.incomplete.contains(&module) {
                    run.incomplete.push(module.clone());
                }
            }
        }
        if !slot.started {
            self.startup_failures += 1;
        }
        if self.queue.is_empty() || self.aborted {
            return;
        }
        if self.startup_failures >= MAX_STARTUP_FAILURES {
            tracing::error!(
                failures = self.startup_failures,
                "workers keep dying before asking for work, not replacing"
            );
            if self.live_workers() == 0 {
                self.abandon_queue();
            }
            return;
        }
        if let Err(error) = self.spawn() {
            tracing::error!(%error, "failed to replace worker");
            if self.live_workers() == 0 {
                self.abandon_queue();
            }
        }
    }

    /// Fail every outstanding run; let running modules finish.
    fn abort(&mut self) {
        self.aborted = true;
        self.queue.clear();
        for run in self.runs.drain(..) {
            self.updates.push_back(Update::RunAborted { id: run.id });
        }
        self.dispatch();
    }

    /// No worker is left to drain the queue: report queued modules as
    /// incomplete.
    fn abandon_queue(&mut self) {
        for module in self.queue.drain(..) {
            for run in &mut self.runs {
                if run.modules.contains(&module) && !run.incomplete.contains(&module) {
                    run.incomplete.push(module.clone());
                }
            }
        }
    }

    /// Complete every run whose modules are neither queued nor running.
    fn resolve_runs(&mut self) {
        let mut index = 0;
        while index < self.runs.len() {
            let run = &self.runs[index];
            let finished = run.modules.iter().all(|module| {
                !self.queue.contains(module) && !self.assignments.values().any(|m| m == module)
            });
            if finished {
                let run = self.runs.remove(index);
                tracing::debug!(run = run.id.0, incomplete = run.incomplete.len(), "run completed");
                self.updates.push_back(Update::RunCompleted(RunOutcome {
                    id: run.id,
                    modules: run.modules,
                    incomplete: run.incomplete,
                }));
            } else {
                index += 1;
            }
        }
    }
}

fn stop(worker: WorkerId, slot: &mut WorkerSlot) {
    slot.stopping = true;
    if let Err(error) = slot.handle.send(&ControllerMessage::Stop) {
        tracing::debug!(%worker, %error, "failed to stop worker");
    }
}
