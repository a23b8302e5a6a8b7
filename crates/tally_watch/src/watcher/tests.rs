#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use super::*;
use crate::Debouncer;
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};

#[derive(Default)]
struct RecordingBackend {
    calls: Vec<String>,
}

impl WatchBackend for RecordingBackend {
    fn start(&mut self) -> Result<(), WatchError> {
        self.calls.push("start".to_owned());
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.push("stop".to_owned());
    }

    fn watch(&mut self, file: &Path) -> Result<(), WatchError> {
        self.calls.push(format!("watch {}", file.display()));
        Ok(())
    }

    fn unwatch(&mut self, file: &Path) -> Result<(), WatchError> {
        self.calls.push(format!("unwatch {}", file.display()));
        Ok(())
    }
}

const F1: &str = "/tally-missing/f1.rs";
const F2: &str = "/tally-missing/f2.rs";

fn set(modules: &[&str]) -> BTreeSet<ModuleId> {
    modules.iter().copied().map(ModuleId::from).collect()
}

#[test]
fn shrinking_dependencies_unwatches_only_dropped_files() {
    let mut watcher = DependencyWatcher::new(RecordingBackend::default());
    let m = ModuleId::from("m.rs");
    watcher.start().unwrap();

    watcher.update_dependencies(&m, [F1, F2]).unwrap();
    assert_eq!(watcher.dependants(Path::new(F1)), Some(&set(&["m.rs"])));
    assert_eq!(watcher.dependants(Path::new(F2)), Some(&set(&["m.rs"])));

    watcher.update_dependencies(&m, [F1]).unwrap();
    assert_eq!(watcher.dependants(Path::new(F2)), None);
    assert_eq!(
        watcher.backend().calls,
        vec![
            "start".to_owned(),
            format!("watch {F1}"),
            format!("watch {F2}"),
            format!("unwatch {F2}"),
        ]
    );
    assert_eq!(
        watcher.watched_files().into_iter().collect::<Vec<_>>(),
        vec![Path::new(F1)]
    );
}

#[test]
fn shared_file_stays_watched_until_last_dependant_leaves() {
    let mut watcher = DependencyWatcher::new(RecordingBackend::default());
    let a = ModuleId::from("a.rs");
    let b = ModuleId::from("b.rs");
    watcher.update_dependencies(&a, [F1]).unwrap();
    watcher.update_dependencies(&b, [F1]).unwrap();
    assert_eq!(watcher.changed(Path::new(F1)), set(&["a.rs", "b.rs"]));

    watcher.remove_module(&a).unwrap();
    assert_eq!(watcher.changed(Path::new(F1)), set(&["b.rs"]));
    watcher.remove_module(&b).unwrap();
    assert!(watcher.changed(Path::new(F1)).is_empty());
    assert_eq!(
        watcher.backend().calls,
        vec![format!("watch {F1}"), format!("unwatch {F1}")]
    );
    assert_eq!(watcher.dependencies(&a), None);
}

#[test]
fn unchanged_update_touches_nothing() {
    let mut watcher = DependencyWatcher::new(RecordingBackend::default());
    let m = ModuleId::from("m.rs");
    watcher.update_dependencies(&m, [F1, F2]).unwrap();
    watcher.update_dependencies(&m, [F2, F1]).unwrap();
    assert_eq!(watcher.backend().calls.len(), 2);
}

#[test]
fn start_and_stop_with_nothing_watched() {
    let mut watcher = DependencyWatcher::new(RecordingBackend::default());
    watcher.start().unwrap();
    assert!(watcher.is_running());
    watcher.stop();
    assert!(!watcher.is_running());
    assert!(watcher.watched_files().is_empty());
}

#[test]
fn burst_of_changes_schedules_one_rerun() {
    let mut watcher = DependencyWatcher::new(RecordingBackend::default());
    watcher
        .update_dependencies(&ModuleId::from("m.rs"), [F1])
        .unwrap();

    let start = Instant::now();
    let mut debouncer = Debouncer::default();
    for offset in [0, 20, 40] {
        let now = start + Duration::from_millis(offset);
        debouncer.push(watcher.changed(Path::new(F1)), now);
        assert_eq!(debouncer.take_ready(now), None);
    }
    let ready = debouncer.take_ready(start + Duration::from_millis(140));
    assert_eq!(ready, Some(vec![ModuleId::from("m.rs")]));
    assert_eq!(debouncer.take_ready(start + Duration::from_secs(1)), None);
}

#[test]
fn unrelated_paths_have_no_dependants() {
    let mut watcher = DependencyWatcher::new(RecordingBackend::default());
    watcher
        .update_dependencies(&ModuleId::from("m.rs"), [F1])
        .unwrap();
    assert!(watcher.changed(Path::new("/tally-missing/other.rs")).is_empty());
}

#[test]
fn notify_backend_reports_file_changes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("dep.rs");
    std::fs::write(&file, "// v1").unwrap();

    let (backend, changes) = NotifyBackend::channel();
    let mut watcher = DependencyWatcher::new(backend);
    let module = ModuleId::from("m.rs");
    watcher.update_dependencies(&module, [&file]).unwrap();
    watcher.start().unwrap();

    std::fs::write(&file, "// v2").unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut affected = BTreeSet::new();
    while affected.is_empty() && Instant::now() < deadline {
        if let Ok(path) = changes.recv_timeout(Duration::from_millis(200)) {
            affected = watcher.changed(&path);
        }
    }
    assert_eq!(affected, set(&["m.rs"]));
    watcher.stop();
}
