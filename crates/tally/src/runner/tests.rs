#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use super::*;
use crate::ModuleSummary;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::io;
use tally_core::{ModuleRegistry, PluginRegistry, TestView};
use tally_pool::{
    ControllerMessage, MessageSink, PoolEvent, ProtocolError, Worker, WorkerHandle, WorkerId,
    WorkerMessage,
};

/// Records what a reporter was told, and hands out run summaries.
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
    summaries: Sender<TestSummary>,
}

impl Reporter for Recorder {
    fn test_completed(&mut self, test: TestView<'_>) -> io::Result<()> {
        self.log
            .lock()
            .push(format!("test {}", test.full_name().join(" > ")));
        Ok(())
    }

    fn module_started(&mut self, module: &ModuleId) -> io::Result<()> {
        self.log.lock().push(format!("started {module}"));
        Ok(())
    }

    fn module_completed(&mut self, summary: &ModuleSummary) -> io::Result<()> {
        self.log.lock().push(format!(
            "completed {} {}/{}",
            summary.module, summary.passed, summary.failed
        ));
        Ok(())
    }

    fn run_completed(&mut self, summary: &TestSummary) -> io::Result<()> {
        let _ = self.summaries.send(summary.clone());
        Ok(())
    }
}

struct ThreadLauncher {
    loader: Arc<dyn ModuleLoader>,
}

struct EventSink {
    worker: WorkerId,
    events: Sender<PoolEvent>,
}

impl MessageSink<WorkerMessage> for EventSink {
    fn send(&mut self, message: &WorkerMessage) -> Result<(), ProtocolError> {
        self.events
            .send(PoolEvent::Message {
                worker: self.worker,
                message: message.clone(),
            })
            .map_err(|_| ProtocolError::Disconnected)
    }
}

struct ChannelHandle(Sender<ControllerMessage>);

impl WorkerHandle for ChannelHandle {
    fn send(&mut self, message: &ControllerMessage) -> Result<(), ProtocolError> {
        self.0
            .send(message.clone())
            .map_err(|_| ProtocolError::Disconnected)
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(
        &mut self,
        worker: WorkerId,
        _config: &RunConfig,
        events: Sender<PoolEvent>,
    ) -> Result<Box<dyn tally_pool::WorkerHandle>, PoolError> {
        let (commands, inbox) = channel::unbounded();
        let loader = Arc::clone(&self.loader);
        std::thread::spawn(move || {
            let sink = EventSink {
                worker,
                events: events.clone(),
            };
            let status = Worker::new(loader, PluginRegistry::builtin()).serve(inbox, sink);
            let _ = events.send(PoolEvent::Exited {
                worker,
                code: Some(status.code()),
            });
        });
        Ok(Box::new(ChannelHandle(commands)))
    }
}

/// Watch backend that never sees the file system; changes come from the test.
struct Silent;

impl WatchBackend for Silent {
    fn start(&mut self) -> Result<(), WatchError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn watch(&mut self, _file: &Path) -> Result<(), WatchError> {
        Ok(())
    }

    fn unwatch(&mut self, _file: &Path) -> Result<(), WatchError> {
        Ok(())
    }
}

fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register("math.rs", |m| {
        m.test("arithmetic", |t| {
            t.test("adds", |_| assert_eq!(1 + 1, 2));
            t.test("multiplies", |_| assert_eq!(2 * 3, 6));
        });
    });
    registry.register("strings.rs", |m| {
        m.test("upper", |_| -> Result<(), String> {
            Err("expected `B`, found `A`".to_owned())
        });
    });
    registry
}

fn ids(names: &[&str]) -> Vec<ModuleId> {
    names.iter().copied().map(ModuleId::from).collect()
}

type Harness<L> = (TestRunner<L>, Arc<Mutex<Vec<String>>>, Receiver<TestSummary>);

fn harness<L: WorkerLauncher>(
    config: RunConfig,
    loader: Arc<dyn ModuleLoader>,
    launcher: L,
) -> Harness<L> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (summaries, received) = channel::unbounded();
    let reporter = Recorder {
        log: Arc::clone(&log),
        summaries,
    };
    let runner = TestRunner::new(
        config,
        loader,
        PluginRegistry::builtin(),
        launcher,
        Box::new(reporter),
    );
    (runner, log, received)
}

fn in_process(config: RunConfig, loader: Arc<dyn ModuleLoader>) -> Harness<ProcessLauncher> {
    harness(config, loader, ProcessLauncher::new("unused"))
}

#[test]
fn in_process_run_reports_and_summarizes() {
    let (mut runner, log, summaries) = in_process(RunConfig::in_process(), Arc::new(registry()));

    let summary = runner.run(&ids(&["math.rs", "strings.rs"])).unwrap();

    assert_eq!((summary.passed, summary.failed), (2, 1));
    assert_eq!(summary.exit_status(), ExitStatus::TestsFailed);
    assert_eq!(
        *log.lock(),
        vec![
            "started math.rs",
            "test arithmetic > adds",
            "test arithmetic > multiplies",
            "test arithmetic",
            "completed math.rs 2/0",
            "started strings.rs",
            "test upper",
            "completed strings.rs 0/1",
        ]
    );
    assert_eq!(summaries.try_recv().unwrap(), summary);
    assert!(!runner.model().all_tests_passed());
}

#[test]
fn in_process_plugin_failure_is_fatal() {
    let config = RunConfig {
        plugins: vec!["missing".to_owned()],
        ..RunConfig::in_process()
    };
    let (mut runner, log, _) = in_process(config, Arc::new(registry()));

    let error = runner.run(&ids(&["math.rs"])).unwrap_err();

    assert_eq!(error.exit_status(), ExitStatus::PluginLoadError);
    assert!(log.lock().is_empty());
}

#[test]
fn in_process_panicking_plugin_is_a_load_error() {
    let mut plugins = PluginRegistry::builtin();
    plugins.register("boom", || panic!("plugin exploded while loading"));
    let (summaries_tx, summaries) = channel::unbounded();
    let reporter = Recorder {
        log: Arc::new(Mutex::new(Vec::new())),
        summaries: summaries_tx,
    };
    let mut runner = TestRunner::new(
        RunConfig {
            plugins: vec!["boom".to_owned()],
            ..RunConfig::in_process()
        },
        Arc::new(registry()),
        plugins,
        ProcessLauncher::new("unused"),
        Box::new(reporter),
    );

    let error = runner.run(&ids(&["math.rs"])).unwrap_err();

    assert!(matches!(
        error,
        RunnerError::Plugin(PluginError::Failed { ref name, .. }) if name == "boom"
    ));
    assert_eq!(error.exit_status(), ExitStatus::PluginLoadError);
    assert!(summaries.try_recv().is_err());
}

#[test]
fn pooled_run_matches_in_process() {
    let config = RunConfig {
        concurrency: 2,
        ..RunConfig::default()
    };
    let loader: Arc<dyn ModuleLoader> = Arc::new(registry());
    let launcher = ThreadLauncher {
        loader: Arc::clone(&loader),
    };
    let (mut runner, _, _) = harness(config, loader, launcher);

    let summary = runner.run(&ids(&["math.rs", "strings.rs"])).unwrap();

    assert_eq!((summary.passed, summary.failed), (2, 1));
    assert!(summary.incomplete.is_empty());
    let modules: Vec<_> = summary.modules.iter().map(|m| m.module.clone()).collect();
    assert_eq!(modules, ids(&["math.rs", "strings.rs"]));
}

#[test]
fn pooled_plugin_failure_aborts() {
    let config = RunConfig {
        concurrency: 2,
        plugins: vec!["missing".to_owned()],
        ..RunConfig::default()
    };
    let loader: Arc<dyn ModuleLoader> = Arc::new(registry());
    let launcher = ThreadLauncher {
        loader: Arc::clone(&loader),
    };
    let (mut runner, _, summaries) = harness(config, loader, launcher);

    let error = runner.run(&ids(&["math.rs", "strings.rs"])).unwrap_err();

    assert!(matches!(error, RunnerError::Pool(PoolError::Aborted)));
    assert_eq!(error.exit_status(), ExitStatus::PluginLoadError);
    assert!(summaries.try_recv().is_err());
}

#[test]
fn pooled_run_reports_each_completed_test() {
    let config = RunConfig {
        concurrency: 1,
        ..RunConfig::default()
    };
    let loader: Arc<dyn ModuleLoader> = Arc::new(registry());
    let launcher = ThreadLauncher {
        loader: Arc::clone(&loader),
    };
    let (mut runner, log, _) = harness(config, loader, launcher);

    runner.run(&ids(&["math.rs"])).unwrap();

    let tests: Vec<String> = log
        .lock()
        .iter()
        .filter_map(|line| line.strip_prefix("test ").map(str::to_owned))
        .collect();
    assert_eq!(
        tests,
        vec!["arithmetic > adds", "arithmetic > multiplies", "arithmetic"]
    );
}

#[test]
fn duplicate_modules_run_once() {
    let (mut runner, log, _) = in_process(RunConfig::in_process(), Arc::new(registry()));
    let summary = runner.run(&ids(&["math.rs", "math.rs"])).unwrap();
    assert_eq!(summary.passed, 2);
    let started = log.lock().iter().filter(|line| line.starts_with("started")).count();
    assert_eq!(started, 1);
}

#[test]
fn watch_reruns_only_affected_modules() {
    let dir = tempfile::tempdir().unwrap();
    let shared = dir.path().join("shared.rs");
    let other = dir.path().join("other.rs");
    std::fs::write(&shared, "").unwrap();
    std::fs::write(&other, "").unwrap();

    let mut registry = registry();
    registry
        .register("math.rs", |m| {
            m.test("adds", |_| assert_eq!(1 + 1, 2));
        })
        .depends_on([shared.clone()]);

    let (changes, changed) = channel::unbounded();
    let (stop, stopped) = channel::unbounded();
    let (summaries_tx, summaries) = channel::unbounded();
    let handle = std::thread::spawn(move || {
        let runner_log = Arc::new(Mutex::new(Vec::new()));
        let reporter = Recorder {
            log: runner_log,
            summaries: summaries_tx,
        };
        let mut runner = TestRunner::new(
            RunConfig {
                watch: true,
                ..RunConfig::in_process()
            },
            Arc::new(registry),
            PluginRegistry::builtin(),
            ProcessLauncher::new("unused"),
            Box::new(reporter),
        )
        .debounce(Duration::from_millis(20));
        runner.watch_with(&ids(&["math.rs", "strings.rs"]), Silent, &changed, &stopped)
    });

    let timeout = Duration::from_secs(10);
    let first = summaries.recv_timeout(timeout).unwrap();
    assert_eq!(first.modules.len(), 2);

    for _ in 0..3 {
        changes.send(shared.clone()).unwrap();
    }
    let second = summaries.recv_timeout(timeout).unwrap();
    let rerun: Vec<_> = second.modules.iter().map(|m| m.module.clone()).collect();
    assert_eq!(rerun, ids(&["math.rs"]));

    changes.send(other).unwrap();
    assert!(summaries.recv_timeout(Duration::from_millis(200)).is_err());

    stop.send(()).unwrap();
    handle.join().unwrap().unwrap();
}
