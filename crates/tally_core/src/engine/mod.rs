//! Reentrant execution engine.
//!
//! Declaring a test and running it are the same call. During a module's
//! collection sub-pass only top-level declarations are recorded. During the
//! run sub-pass each top-level body is invoked once per tick until the node
//! has completed. Within a tick the first nested test that has not completed
//! executes; once it returns, the suppression flag makes every later
//! declaration in that tick a no-op, so each tick advances exactly one
//! depth-first unit of work and side effects of later siblings never fire
//! early.
//!
//! All position state lives in the [`Engine`] and reaches test bodies
//! through the [`Scope`] handle passed to them, never through globals.

mod context;

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::middleware::{self, Collect, Finally, Run, RunModule};
use crate::{
    panic, ModuleId, ModuleLoader, NodeId, Outcome, Pipeline, TestError, TestEvent, TestTree,
    TestView,
};

pub use context::Context;

/// Error recorded on a node whose nested tests could not make progress.
pub(crate) const STALLED: &str = "test stalled: nested tests were declared but none of them ran";

type Body = Rc<dyn Fn(&mut Scope<'_>) -> Option<TestError>>;

/// Drives test modules through the middleware pipeline and reports progress
/// as [`TestEvent`]s.
pub struct Engine {
    pub(crate) pipeline: Pipeline,
    loader: Arc<dyn ModuleLoader>,
    sink: Box<dyn FnMut(TestEvent)>,
    /// Tree of the module currently running.
    pub(crate) tree: TestTree,
    /// Top-level bodies of the current module.
    bodies: FxHashMap<NodeId, Body>,
    pub(crate) finished: BTreeMap<ModuleId, TestTree>,
    /// Node whose body is executing; `None` at module level.
    cursor: Option<NodeId>,
    suppressed: bool,
    /// Events held back while a module is loading.
    pending: Option<Vec<TestEvent>>,
    /// Bodies entered so far, used to detect stalled nodes.
    executed: u64,
    pub(crate) context: Context,
}

impl Engine {
    pub fn new(
        pipeline: Pipeline,
        loader: Arc<dyn ModuleLoader>,
        sink: impl FnMut(TestEvent) + 'static,
    ) -> Self {
        Engine {
            pipeline,
            loader,
            sink: Box::new(sink),
            tree: TestTree::default(),
            bodies: FxHashMap::default(),
            finished: BTreeMap::new(),
            cursor: None,
            suppressed: false,
            pending: None,
            executed: 0,
            context: Context::default(),
        }
    }

    /// Run each module in order, then the `finally` hook.
    pub fn run_modules(&mut self, modules: &[ModuleId]) {
        let mut seen = BTreeSet::new();
        for module in modules {
            if seen.insert(module) {
                self.run_module(module);
            }
        }
        self.finish();
    }

    /// Load `module` and drive every test it declares to completion.
    ///
    /// A module that has run before is rebuilt from scratch.
    #[tracing::instrument(level = "debug", skip_all, fields(module = %module))]
    pub fn run_module(&mut self, module: &ModuleId) {
        self.tree = TestTree::new(module.clone());
        self.bodies.clear();
        self.emit(TestEvent::ModuleStarted {
            module: module.clone(),
        });

        let mut core = |engine: &mut Engine| engine.drive_module();
        middleware::dispatch(self, RunModule, &mut core);

        self.bodies.clear();
        let tree = std::mem::take(&mut self.tree);
        let dependencies = self.loader.dependencies(module);
        tracing::debug!(
            tests = tree.len(),
            passed = tree.all_passed(),
            "module finished"
        );
        self.finished.insert(module.clone(), tree);
        self.emit(TestEvent::ModuleCompleted {
            module: module.clone(),
            dependencies,
        });
    }

    /// Dispatch the `finally` hook over every finished module.
    pub fn finish(&mut self) {
        let mut core = |_: &mut Engine| {};
        middleware::dispatch(self, Finally, &mut core);
    }

    /// Trees of every module this engine has finished.
    pub fn results(&self) -> &BTreeMap<ModuleId, TestTree> {
        &self.finished
    }

    fn drive_module(&mut self) {
        let module = self.tree.module().clone();
        let loader = Arc::clone(&self.loader);
        loader.invalidate(&module);

        self.cursor = None;
        self.suppressed = false;
        self.pending = Some(Vec::new());
        let loaded = panic::catch(|| loader.load(&module, &mut ModuleScope { engine: &mut *self }))
            .and_then(|result| result);
        let collected = self.pending.take().unwrap_or_default();

        match loaded {
            Ok(()) => {
                for event in collected {
                    self.emit(event);
                }
            }
            Err(error) => {
                tracing::debug!(%error, "module failed to load");
                self.tree = TestTree::new(module.clone());
                self.bodies.clear();
                if let Some(id) = self.declare(module.as_str()) {
                    let body: Body = Rc::new(move |_: &mut Scope<'_>| Some(error.clone()));
                    self.bodies.insert(id, body);
                }
            }
        }

        for root in self.tree.roots().to_vec() {
            self.run_root(root);
        }
    }

    /// Tick a top-level test until it completes.
    fn run_root(&mut self, id: NodeId) {
        let Some(body) = self.bodies.get(&id).cloned() else {
            return;
        };
        let mut tick = 0;
        while !self.tree.has_completed(id) {
            tick += 1;
            let runs = self.tree.node(id).run_count;
            self.context = Context::for_tick(tick);
            self.cursor = None;
            self.suppressed = false;
            self.run_node(id, |scope| body(scope));
            if self.tree.node(id).run_count == runs {
                tracing::debug!(test = self.tree.node(id).name(), "run skipped by middleware");
                break;
            }
        }
        self.suppressed = false;
    }

    /// Find or create the child `name` of the current position.
    ///
    /// Returns `None` when a middleware declined to collect a new node.
    fn declare(&mut self, name: &str) -> Option<NodeId> {
        let parent = self.cursor;
        if let Some(id) = self.tree.child(parent, name) {
            return Some(id);
        }
        let id = self.tree.insert_detached(parent, name);
        let mut core = move |engine: &mut Engine| engine.collect(id);
        middleware::dispatch(self, Collect { id }, &mut core);
        self.tree.is_attached(id).then_some(id)
    }

    fn collect(&mut self, id: NodeId) {
        self.tree.attach(id);
        let node = self.tree.node(id);
        let path = node
            .parent()
            .map(|parent| self.tree.full_name(parent))
            .unwrap_or_default();
        let event = TestEvent::TestCollected {
            module: self.tree.module().clone(),
            path,
            name: node.name().to_owned(),
        };
        self.emit(event);
    }

    fn run_node(&mut self, id: NodeId, body: impl FnOnce(&mut Scope<'_>) -> Option<TestError>) {
        let mut body = Some(body);
        let mut core = move |engine: &mut Engine| {
            if let Some(body) = body.take() {
                engine.execute(id, body);
            }
        };
        middleware::dispatch(self, Run { id }, &mut core);
    }

    fn execute(&mut self, id: NodeId, body: impl FnOnce(&mut Scope<'_>) -> Option<TestError>) {
        let outer = self.cursor.replace(id);
        self.executed += 1;
        let executed = self.executed;
        self.tree.node_mut(id).run_count += 1;

        let started = Instant::now();
        let outcome = panic::catch(|| body(&mut Scope { engine: &mut *self }));
        let elapsed = started.elapsed();

        let mut error = outcome.unwrap_or_else(Some);
        if error.is_none() && self.executed == executed && !self.tree.children_completed(id) {
            error = Some(TestError::new(STALLED));
        }

        let node = self.tree.node_mut(id);
        node.duration += elapsed;
        if node.error.is_none() {
            node.error = error;
        }
        let event = TestEvent::TestRun {
            module: self.tree.module().clone(),
            path: self.tree.full_name(id),
            duration: self.tree.node(id).duration,
            error: self.tree.node(id).error.clone(),
        };
        tracing::trace!(test = ?self.tree.full_name(id), ?elapsed, "test ran");
        self.emit(event);

        self.cursor = outer;
        self.suppressed = self.tree.node(id).parent().is_some();
    }

    fn emit(&mut self, event: TestEvent) {
        match &mut self.pending {
            Some(pending) => pending.push(event),
            None => (self.sink)(event),
        }
    }
}

/// Handle passed to a test body; declares nested tests at its position.
pub struct Scope<'e> {
    engine: &'e mut Engine,
}

impl Scope<'_> {
    /// Declare the nested test `name` and run it if this tick may.
    ///
    /// Declarations are matched by name, so a body must issue the same
    /// declarations on every tick. Returns `None` if a middleware declined
    /// to collect the test.
    ///
    /// A body that only panics has no return type to infer; write it as
    /// `|_| -> () { panic!(..) }`.
    pub fn test<F, R>(&mut self, name: &str, body: F) -> Option<NodeId>
    where
        F: FnOnce(&mut Scope<'_>) -> R,
        R: Outcome,
    {
        let id = self.engine.declare(name)?;
        if !self.engine.suppressed && !self.engine.tree.has_completed(id) {
            self.engine
                .run_node(id, move |scope: &mut Scope<'_>| body(scope).into_error());
        }
        Some(id)
    }

    /// The test whose body is executing.
    pub fn current(&self) -> Option<TestView<'_>> {
        self.engine.cursor.map(|id| self.engine.tree.view(id))
    }

    pub fn module(&self) -> &ModuleId {
        self.engine.tree.module()
    }

    pub fn context(&self) -> &Context {
        &self.engine.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.engine.context
    }
}

/// Handle passed to a module loader; declares top-level tests.
pub struct ModuleScope<'e> {
    engine: &'e mut Engine,
}

impl ModuleScope<'_> {
    /// Declare a top-level test. Its body runs later, once per tick.
    ///
    /// Re-declaring a name keeps the first body.
    pub fn test<F, R>(&mut self, name: &str, body: F) -> Option<NodeId>
    where
        F: Fn(&mut Scope<'_>) -> R + 'static,
        R: Outcome,
    {
        let id = self.engine.declare(name)?;
        let body: Body = Rc::new(move |scope: &mut Scope<'_>| body(scope).into_error());
        self.engine.bodies.entry(id).or_insert(body);
        Some(id)
    }

    pub fn module(&self) -> &ModuleId {
        self.engine.tree.module()
    }
}
