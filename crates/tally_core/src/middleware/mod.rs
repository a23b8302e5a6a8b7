//! Middleware pipeline.
//!
//! Every lifecycle hook is threaded through an ordered chain of
//! [`TestMiddleware`] layers and ends in the engine's own handling. A layer
//! receives a [`Next`] continuation; calling [`Next::proceed`] hands control
//! to the rest of the chain, dropping it short-circuits.
//!
//! The continuation carries its hook's arguments itself, so a layer cannot
//! continue with different ones, and it runs the rest of the chain at most
//! once.

use std::rc::Rc;

use crate::engine::{Context, Engine};
use crate::{ModuleId, TestTree, TestView};

mod sealed {
    pub trait Sealed {}
}

/// One of the four interception points.
pub trait Hook: sealed::Sealed + Copy {
    #[doc(hidden)]
    fn invoke(layer: &dyn TestMiddleware, next: Next<'_, '_, Self>);
}

/// A test node was declared for the first time. The core attaches it to its
/// parent and emits `TestCollected`.
#[derive(Copy, Clone, Debug)]
pub struct Collect {
    pub(crate) id: crate::NodeId,
}

/// A test body is about to execute.
#[derive(Copy, Clone, Debug)]
pub struct Run {
    pub(crate) id: crate::NodeId,
}

/// A module is about to be loaded and driven to completion.
#[derive(Copy, Clone, Debug)]
pub struct RunModule;

/// Every requested module has finished.
#[derive(Copy, Clone, Debug)]
pub struct Finally;

impl sealed::Sealed for Collect {}
impl sealed::Sealed for Run {}
impl sealed::Sealed for RunModule {}
impl sealed::Sealed for Finally {}

impl Hook for Collect {
    fn invoke(layer: &dyn TestMiddleware, next: Next<'_, '_, Self>) {
        layer.collect(next);
    }
}

impl Hook for Run {
    fn invoke(layer: &dyn TestMiddleware, next: Next<'_, '_, Self>) {
        layer.run(next);
    }
}

impl Hook for RunModule {
    fn invoke(layer: &dyn TestMiddleware, next: Next<'_, '_, Self>) {
        layer.run_module(next);
    }
}

impl Hook for Finally {
    fn invoke(layer: &dyn TestMiddleware, next: Next<'_, '_, Self>) {
        layer.finally(next);
    }
}

/// An observer spliced into the engine's lifecycle.
///
/// Every hook defaults to continuing the chain unchanged.
pub trait TestMiddleware {
    fn collect(&self, mut next: Next<'_, '_, Collect>) {
        next.proceed();
    }

    fn run(&self, mut next: Next<'_, '_, Run>) {
        next.proceed();
    }

    fn run_module(&self, mut next: Next<'_, '_, RunModule>) {
        next.proceed();
    }

    fn finally(&self, mut next: Next<'_, '_, Finally>) {
        next.proceed();
    }
}

/// Continuation handed to a middleware layer.
pub struct Next<'a, 't, H: Hook> {
    hook: H,
    rest: &'a [Box<dyn TestMiddleware>],
    engine: &'a mut Engine,
    terminal: &'a mut (dyn FnMut(&mut Engine) + 't),
    proceeded: bool,
}

impl<H: Hook> Next<'_, '_, H> {
    /// Run the remainder of the chain. Later calls do nothing.
    pub fn proceed(&mut self) {
        if std::mem::replace(&mut self.proceeded, true) {
            return;
        }
        match self.rest.split_first() {
            Some((layer, rest)) => {
                let next = Next {
                    hook: self.hook,
                    rest,
                    engine: &mut *self.engine,
                    terminal: &mut *self.terminal,
                    proceeded: false,
                };
                H::invoke(&**layer, next);
            }
            None => (self.terminal)(&mut *self.engine),
        }
    }

    pub fn has_proceeded(&self) -> bool {
        self.proceeded
    }
}

impl Next<'_, '_, Collect> {
    pub fn test(&self) -> TestView<'_> {
        self.engine.tree.view(self.hook.id)
    }
}

impl Next<'_, '_, Run> {
    pub fn test(&self) -> TestView<'_> {
        self.engine.tree.view(self.hook.id)
    }

    /// Values shared by every body in the current tick.
    pub fn context(&self) -> &Context {
        &self.engine.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.engine.context
    }
}

impl Next<'_, '_, RunModule> {
    pub fn module(&self) -> &ModuleId {
        self.engine.tree.module()
    }
}

impl Next<'_, '_, Finally> {
    /// Every module this engine has finished, sorted by id.
    pub fn modules(&self) -> impl Iterator<Item = &TestTree> + '_ {
        self.engine.finished.values()
    }

    /// Top-level tests across all finished modules.
    pub fn roots(&self) -> Vec<TestView<'_>> {
        self.engine
            .finished
            .values()
            .flat_map(|tree| tree.roots().iter().map(move |&id| tree.view(id)))
            .collect()
    }
}

/// Ordered chain of middleware layers, outermost first.
#[derive(Clone)]
pub struct Pipeline {
    layers: Rc<[Box<dyn TestMiddleware>]>,
}

impl Pipeline {
    pub fn new(layers: Vec<Box<dyn TestMiddleware>>) -> Self {
        Pipeline {
            layers: layers.into(),
        }
    }

    pub fn empty() -> Self {
        Pipeline::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::empty()
    }
}

/// Thread `hook` through the engine's pipeline, ending in `terminal`.
pub(crate) fn dispatch<H: Hook>(
    engine: &mut Engine,
    hook: H,
    terminal: &mut (dyn FnMut(&mut Engine) + '_),
) {
    let layers = Rc::clone(&engine.pipeline.layers);
    let mut next = Next {
        hook,
        rest: &layers,
        engine,
        terminal,
        proceeded: false,
    };
    next.proceed();
}

/// Collects only top-level tests whose name contains a pattern.
///
/// Nested tests and synthesized load-failure nodes are always collected.
#[derive(Clone, Debug)]
pub struct NameFilter {
    pattern: String,
}

impl NameFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        NameFilter {
            pattern: pattern.into(),
        }
    }
}

impl TestMiddleware for NameFilter {
    fn collect(&self, mut next: Next<'_, '_, Collect>) {
        let test = next.test();
        let keep = test.parent().is_some()
            || test.name() == test.module().as_str()
            || test.name().contains(&self.pattern);
        if keep {
            next.proceed();
        } else {
            tracing::trace!(test = test.name(), "filtered out");
        }
    }
}
