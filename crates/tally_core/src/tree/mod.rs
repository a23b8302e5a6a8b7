//! The test tree.
//!
//! One [`TestTree`] holds every node declared by a single test module. Nodes
//! live in an arena and refer to each other by [`NodeId`]; ownership is
//! top-down and the parent link is a plain index. A module re-run builds a
//! fresh tree, so ids are never reused across runs.
//!
//! The same tree type backs the live executable tree inside a worker and the
//! passive mirror the controller rebuilds from events.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TestError;

/// Identifier of a test module, conventionally its source path.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        ModuleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier interpreted as a file system path.
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        ModuleId(id.to_owned())
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        ModuleId(id)
    }
}

impl AsRef<str> for ModuleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Index of a node inside its [`TestTree`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One test or test group.
#[derive(Clone, Debug)]
pub struct TestNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Detached nodes were declared but a middleware refused to collect them.
    attached: bool,
    /// Number of times the body has been executed.
    pub run_count: u32,
    /// Cumulative execution time across all runs.
    pub duration: Duration,
    /// First observed failure, if any.
    pub error: Option<TestError>,
}

impl TestNode {
    fn new(name: &str, parent: Option<NodeId>) -> Self {
        TestNode {
            name: name.to_owned(),
            parent,
            children: Vec::new(),
            attached: false,
            run_count: 0,
            duration: Duration::ZERO,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in declaration order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// All tests declared by one module.
#[derive(Clone, Debug, Default)]
pub struct TestTree {
    module: ModuleId,
    nodes: Vec<TestNode>,
    roots: Vec<NodeId>,
}

impl TestTree {
    pub fn new(module: ModuleId) -> Self {
        TestTree {
            module,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    /// Top-level tests in declaration order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Children of `parent`, or the roots when `parent` is `None`.
    pub fn children(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            Some(id) => &self.nodes[id.0].children,
            None => &self.roots,
        }
    }

    pub fn node(&self, id: NodeId) -> &TestNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TestNode {
        &mut self.nodes[id.0]
    }

    pub fn view(&self, id: NodeId) -> TestView<'_> {
        TestView { tree: self, id }
    }

    /// Look up an attached child by name.
    pub fn child(&self, parent: Option<NodeId>, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&id| self.nodes[id.0].name == name)
    }

    /// Append a new attached node under `parent`.
    pub fn insert(&mut self, parent: Option<NodeId>, name: &str) -> NodeId {
        let id = self.insert_detached(parent, name);
        self.attach(id);
        id
    }

    /// Allocate a node that is not yet visible from its parent.
    pub(crate) fn insert_detached(&mut self, parent: Option<NodeId>, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TestNode::new(name, parent));
        id
    }

    pub(crate) fn attach(&mut self, id: NodeId) {
        if self.nodes[id.0].attached {
            return;
        }
        self.nodes[id.0].attached = true;
        match self.nodes[id.0].parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.nodes[id.0].attached
    }

    /// Walk `path` from the roots. Fails if any segment is unmatched.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<NodeId> {
        let (first, rest) = path.split_first()?;
        let mut current = self.child(None, first.as_ref())?;
        for segment in rest {
            current = self.child(Some(current), segment.as_ref())?;
        }
        Some(current)
    }

    /// Ancestor names followed by the node's own name.
    pub fn full_name(&self, id: NodeId) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            names.push(self.nodes[node.0].name.clone());
            current = self.nodes[node.0].parent;
        }
        names.reverse();
        names
    }

    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes[id.0].parent;
        while let Some(node) = current {
            depth += 1;
            current = self.nodes[node.0].parent;
        }
        depth
    }

    /// `run_count > 0` and either failed or every child has completed.
    pub fn has_completed(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        node.run_count > 0 && (node.error.is_some() || self.children_completed(id))
    }

    /// Completed without error, and so is every descendant.
    pub fn has_passed(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        node.run_count > 0
            && node.error.is_none()
            && node.children.iter().all(|&child| self.has_passed(child))
    }

    pub(crate) fn children_completed(&self, id: NodeId) -> bool {
        self.nodes[id.0]
            .children
            .iter()
            .all(|&child| self.has_completed(child))
    }

    /// Every top-level test has passed.
    pub fn all_passed(&self) -> bool {
        self.roots.iter().all(|&id| self.has_passed(id))
    }

    /// Attached nodes in depth-first declaration order.
    pub fn iter(&self) -> impl Iterator<Item = TestView<'_>> + '_ {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            stack.extend(self.nodes[id.0].children.iter().rev());
            Some(self.view(id))
        })
    }

    /// Number of attached nodes.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Borrowed view of one node together with its tree.
#[derive(Copy, Clone)]
pub struct TestView<'a> {
    tree: &'a TestTree,
    id: NodeId,
}

impl<'a> TestView<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &'a TestTree {
        self.tree
    }

    pub fn module(&self) -> &'a ModuleId {
        &self.tree.module
    }

    pub fn name(&self) -> &'a str {
        &self.tree.nodes[self.id.0].name
    }

    pub fn full_name(&self) -> Vec<String> {
        self.tree.full_name(self.id)
    }

    pub fn parent(&self) -> Option<TestView<'a>> {
        let tree = self.tree;
        tree.nodes[self.id.0].parent.map(|id| tree.view(id))
    }

    pub fn children(&self) -> impl Iterator<Item = TestView<'a>> + 'a {
        let tree = self.tree;
        tree.nodes[self.id.0]
            .children
            .iter()
            .map(move |&id| tree.view(id))
    }

    pub fn is_leaf(&self) -> bool {
        self.tree.nodes[self.id.0].children.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth(self.id)
    }

    pub fn run_count(&self) -> u32 {
        self.tree.nodes[self.id.0].run_count
    }

    pub fn duration(&self) -> Duration {
        self.tree.nodes[self.id.0].duration
    }

    pub fn error(&self) -> Option<&'a TestError> {
        self.tree.nodes[self.id.0].error.as_ref()
    }

    pub fn has_completed(&self) -> bool {
        self.tree.has_completed(self.id)
    }

    pub fn has_passed(&self) -> bool {
        self.tree.has_passed(self.id)
    }
}

impl fmt::Debug for TestView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestView")
            .field("module", self.module())
            .field("full_name", &self.full_name())
            .field("run_count", &self.run_count())
            .finish_non_exhaustive()
    }
}
