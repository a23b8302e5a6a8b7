#![expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]

use super::*;
use crate::{Engine, ModuleRegistry, Pipeline, TestError};
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

fn events_for(registry: ModuleRegistry, modules: &[&str]) -> (Engine, Vec<TestEvent>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let mut engine = Engine::new(Pipeline::empty(), Arc::new(registry), move |event| {
        sink.borrow_mut().push(event);
    });
    let modules: Vec<_> = modules.iter().copied().map(ModuleId::from).collect();
    engine.run_modules(&modules);
    let events = events.borrow().clone();
    (engine, events)
}

fn sample_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register("math.rs", |m| {
        m.test("arithmetic", |t| {
            t.test("adds", |_| assert_eq!(1 + 1, 2));
            t.test("subtracts", |_| assert_eq!(3 - 1, 2));
        });
    });
    registry.register("strings.rs", |m| {
        m.test("upper", |_| assert_eq!("a".to_uppercase(), "B"));
    });
    registry
}

fn collected(module: &str, path: &[&str], name: &str) -> TestEvent {
    TestEvent::TestCollected {
        module: ModuleId::from(module),
        path: path.iter().map(|s| (*s).to_owned()).collect(),
        name: name.to_owned(),
    }
}

#[test]
fn mirrors_engine_tree() {
    let (engine, events) = events_for(sample_registry(), &["math.rs", "strings.rs"]);
    let mut model = TestInfoModel::new();
    for event in &events {
        model.update(event).unwrap();
    }

    for (module, tree) in engine.results() {
        let mirror = model.module_tree(module).unwrap();
        let live: Vec<_> = tree
            .iter()
            .map(|v| (v.full_name(), v.run_count(), v.duration(), v.has_passed()))
            .collect();
        let mirrored: Vec<_> = mirror
            .iter()
            .map(|v| (v.full_name(), v.run_count(), v.duration(), v.has_passed()))
            .collect();
        assert_eq!(mirrored, live);
        assert!(model.is_module_complete(module));
    }

    assert!(!model.all_tests_passed());
    assert_eq!(model.all_tests().len(), 2);
    let math = ModuleId::from("math.rs");
    assert!(model.find_test(&math, &["arithmetic", "adds"]).unwrap().has_passed());
    assert!(model.find_test(&math, &["arithmetic", "divides"]).is_none());
    assert_eq!(model.module_tests(&math)[0].name(), "arithmetic");
}

#[test]
fn module_started_resets_previous_tree() {
    let mut model = TestInfoModel::new();
    model.update(&TestEvent::ModuleStarted { module: ModuleId::from("a.rs") }).unwrap();
    model.update(&collected("a.rs", &[], "old")).unwrap();
    model
        .update(&TestEvent::ModuleCompleted {
            module: ModuleId::from("a.rs"),
            dependencies: Vec::new(),
        })
        .unwrap();

    model.update(&TestEvent::ModuleStarted { module: ModuleId::from("a.rs") }).unwrap();
    let module = ModuleId::from("a.rs");
    assert!(!model.is_module_complete(&module));
    assert!(model.find_test(&module, &["old"]).is_none());
    assert!(model.module_tests(&module).is_empty());
}

#[test]
fn run_updates_counts_and_errors() {
    let mut model = TestInfoModel::new();
    model.update(&collected("a.rs", &[], "t")).unwrap();
    let run = |error: Option<TestError>, millis| TestEvent::TestRun {
        module: ModuleId::from("a.rs"),
        path: vec!["t".to_owned()],
        duration: Duration::from_millis(millis),
        error,
    };
    model.update(&run(None, 3)).unwrap();
    model.update(&run(Some(TestError::new("late")), 5)).unwrap();

    let test = model.find_test(&ModuleId::from("a.rs"), &["t"]).unwrap();
    assert_eq!(test.run_count(), 2);
    assert_eq!(test.duration(), Duration::from_millis(5));
    assert_eq!(test.error(), Some(&TestError::new("late")));
}

#[test]
fn unknown_paths_are_rejected() {
    let mut model = TestInfoModel::new();
    let error = model.update(&collected("a.rs", &["ghost"], "child")).unwrap_err();
    assert_eq!(
        error,
        ModelError::UnknownTest {
            module: ModuleId::from("a.rs"),
            path: vec!["ghost".to_owned()],
        }
    );
    assert_eq!(error.to_string(), "unknown test `ghost` in module `a.rs`");

    let run = TestEvent::TestRun {
        module: ModuleId::from("b.rs"),
        path: vec!["x".to_owned()],
        duration: Duration::ZERO,
        error: None,
    };
    assert!(model.update(&run).is_err());
}

#[test]
fn duplicate_collection_reuses_node() {
    let mut model = TestInfoModel::new();
    let first = model.update(&collected("a.rs", &[], "t")).unwrap();
    let second = model.update(&collected("a.rs", &[], "t")).unwrap();
    assert_eq!(first, second);
    assert_eq!(model.module_tests(&ModuleId::from("a.rs")).len(), 1);
}

#[test]
fn empty_model_has_passed_vacuously() {
    let model = TestInfoModel::new();
    assert!(model.all_tests_passed());
    assert!(model.all_tests().is_empty());
}
