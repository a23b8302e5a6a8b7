//! Module loading.

use std::collections::btree_map::{BTreeMap, Entry};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{ModuleId, ModuleScope, Outcome, TestError};

/// Loads a test module so that its declarations reach the engine.
///
/// `load` may be called again for the same module after `invalidate`, and
/// `dependencies` is queried once the module has been loaded.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, module: &ModuleId, scope: &mut ModuleScope<'_>) -> Result<(), TestError>;

    /// Drop any state cached from a previous load of `module`.
    fn invalidate(&self, _module: &ModuleId) {}

    /// Files `module` was built from.
    fn dependencies(&self, _module: &ModuleId) -> Vec<PathBuf> {
        Vec::new()
    }
}

type Declare = Arc<dyn Fn(&mut ModuleScope<'_>) -> Option<TestError> + Send + Sync>;

#[derive(Clone)]
struct Registered {
    declare: Declare,
    dependencies: Vec<PathBuf>,
}

/// Test modules compiled into the host binary.
///
/// Declaration functions are re-invoked from scratch on every load, so
/// there is nothing to invalidate.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, Registered>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    /// Register `declare` as the body of `module`, replacing any previous one.
    ///
    /// A body that only panics needs an explicit `-> ()` return type.
    pub fn register<F, R>(&mut self, module: impl Into<ModuleId>, declare: F) -> ModuleEntry<'_>
    where
        F: Fn(&mut ModuleScope<'_>) -> R + Send + Sync + 'static,
        R: Outcome,
    {
        let declare: Declare = Arc::new(move |scope: &mut ModuleScope<'_>| declare(scope).into_error());
        let registered = Registered {
            declare,
            dependencies: Vec::new(),
        };
        let entry = match self.modules.entry(module.into()) {
            Entry::Vacant(vacant) => vacant.insert(registered),
            Entry::Occupied(mut occupied) => {
                occupied.insert(registered);
                occupied.into_mut()
            }
        };
        ModuleEntry { entry }
    }

    /// Registered module ids, sorted.
    pub fn modules(&self) -> impl Iterator<Item = &ModuleId> + '_ {
        self.modules.keys()
    }

    pub fn contains(&self, module: &ModuleId) -> bool {
        self.modules.contains_key(module)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.modules.keys()).finish()
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, module: &ModuleId, scope: &mut ModuleScope<'_>) -> Result<(), TestError> {
        let registered = self
            .modules
            .get(module)
            .ok_or_else(|| TestError::new(format!("unknown test module `{module}`")))?;
        match (registered.declare)(scope) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn dependencies(&self, module: &ModuleId) -> Vec<PathBuf> {
        self.modules
            .get(module)
            .map(|registered| registered.dependencies.clone())
            .unwrap_or_default()
    }
}

/// Builder returned by [`ModuleRegistry::register`].
pub struct ModuleEntry<'r> {
    entry: &'r mut Registered,
}

impl ModuleEntry<'_> {
    /// Record extra files the module depends on besides its own source.
    pub fn depends_on<P: Into<PathBuf>>(&mut self, files: impl IntoIterator<Item = P>) -> &mut Self {
        self.entry
            .dependencies
            .extend(files.into_iter().map(Into::into));
        self
    }
}
