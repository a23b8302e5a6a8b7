//! Test Info Model.
//!
//! A passive mirror of the test trees, rebuilt from the event stream by
//! whoever did not execute the tests.

use std::collections::BTreeMap;

use crate::{ModuleId, NodeId, TestEvent, TestTree, TestView};

/// An event referenced a test the model has not seen collected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("unknown test `{}` in module `{module}`", path.join(" > "))]
    UnknownTest { module: ModuleId, path: Vec<String> },
}

#[derive(Clone, Debug, Default)]
struct ModuleInfo {
    tree: TestTree,
    completed: bool,
}

/// Event-sourced mirror of every module's test tree.
#[derive(Clone, Debug, Default)]
pub struct TestInfoModel {
    modules: BTreeMap<ModuleId, ModuleInfo>,
}

impl TestInfoModel {
    pub fn new() -> Self {
        TestInfoModel::default()
    }

    /// Apply one event. Returns the node the event touched, if any.
    ///
    /// `ModuleStarted` for a known module discards its previous tree.
    pub fn update(&mut self, event: &TestEvent) -> Result<Option<NodeId>, ModelError> {
        match event {
            TestEvent::ModuleStarted { module } => {
                self.modules.insert(
                    module.clone(),
                    ModuleInfo {
                        tree: TestTree::new(module.clone()),
                        completed: false,
                    },
                );
                Ok(None)
            }
            TestEvent::ModuleCompleted { module, .. } => {
                self.module_entry(module).completed = true;
                Ok(None)
            }
            TestEvent::TestCollected { module, path, name } => {
                let tree = &mut self.module_entry(module).tree;
                let parent = if path.is_empty() {
                    None
                } else {
                    Some(tree.find(path).ok_or_else(|| ModelError::UnknownTest {
                        module: module.clone(),
                        path: path.clone(),
                    })?)
                };
                let id = match tree.child(parent, name) {
                    Some(existing) => existing,
                    None => tree.insert(parent, name),
                };
                Ok(Some(id))
            }
            TestEvent::TestRun {
                module,
                path,
                duration,
                error,
            } => {
                let unknown = || ModelError::UnknownTest {
                    module: module.clone(),
                    path: path.clone(),
                };
                let tree = &mut self.modules.get_mut(module).ok_or_else(unknown)?.tree;
                let id = tree.find(path).ok_or_else(unknown)?;
                let node = tree.node_mut(id);
                node.run_count += 1;
                node.duration = *duration;
                node.error.clone_from(error);
                Ok(Some(id))
            }
        }
    }

    fn module_entry(&mut self, module: &ModuleId) -> &mut ModuleInfo {
        self.modules
            .entry(module.clone())
            .or_insert_with(|| ModuleInfo {
                tree: TestTree::new(module.clone()),
                completed: false,
            })
    }

    /// Look a test up by its full path. Fails if any segment is unmatched.
    pub fn find_test<S: AsRef<str>>(&self, module: &ModuleId, path: &[S]) -> Option<TestView<'_>> {
        let tree = &self.modules.get(module)?.tree;
        tree.find(path).map(|id| tree.view(id))
    }

    pub fn module_tree(&self, module: &ModuleId) -> Option<&TestTree> {
        self.modules.get(module).map(|info| &info.tree)
    }

    /// Top-level tests of `module`.
    pub fn module_tests(&self, module: &ModuleId) -> Vec<TestView<'_>> {
        self.modules
            .get(module)
            .map(|info| info.tree.roots().iter().map(|&id| info.tree.view(id)).collect())
            .unwrap_or_default()
    }

    /// Top-level tests of every known module, by module id.
    pub fn all_tests(&self) -> Vec<TestView<'_>> {
        self.modules
            .values()
            .flat_map(|info| info.tree.roots().iter().map(|&id| info.tree.view(id)))
            .collect()
    }

    /// Every known top-level test has passed.
    pub fn all_tests_passed(&self) -> bool {
        self.modules.values().all(|info| info.tree.all_passed())
    }

    /// `ModuleCompleted` was received since the last `ModuleStarted`.
    pub fn is_module_complete(&self, module: &ModuleId) -> bool {
        self.modules.get(module).is_some_and(|info| info.completed)
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleId> + '_ {
        self.modules.keys()
    }

    /// Forget a module entirely.
    pub fn remove_module(&mut self, module: &ModuleId) {
        self.modules.remove(module);
    }
}

#[cfg(test)]
mod tests;
