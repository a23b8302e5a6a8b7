//! Named middleware plugins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::middleware::{NameFilter, Next, Pipeline, Run, TestMiddleware};
use crate::{catch_panic, PluginError, RunConfig};

type Factory = Arc<dyn Fn() -> Result<Box<dyn TestMiddleware>, String> + Send + Sync>;

/// Middleware factories the host binary makes available by name.
///
/// Factories are called once per engine, inside the process that runs the
/// tests.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, Factory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    /// Registry holding the plugins that ship with tally.
    pub fn builtin() -> Self {
        let mut registry = PluginRegistry::new();
        registry.register("slow-tests", || {
            Ok(Box::new(SlowTests::default()) as Box<dyn TestMiddleware>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn TestMiddleware>, String> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate `names` in order.
    ///
    /// A factory that panics fails to load like one that returns an error.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Box<dyn TestMiddleware>>, PluginError> {
        names
            .iter()
            .map(|name| {
                let factory = self
                    .factories
                    .get(name)
                    .ok_or_else(|| PluginError::Unknown(name.clone()))?;
                catch_panic(|| factory())
                    .unwrap_or_else(|error| Err(error.message))
                    .map_err(|reason| PluginError::Failed {
                        name: name.clone(),
                        reason,
                    })
            })
            .collect()
    }

    /// Build the middleware chain a run with `config` executes under.
    ///
    /// The name filter, when configured, comes first.
    pub fn pipeline(&self, config: &RunConfig) -> Result<Pipeline, PluginError> {
        let mut layers: Vec<Box<dyn TestMiddleware>> = Vec::new();
        if let Some(filter) = &config.filter {
            layers.push(Box::new(NameFilter::new(filter.clone())));
        }
        layers.extend(self.resolve(&config.plugins)?);
        Ok(Pipeline::new(layers))
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

/// Warns about leaf tests whose body takes longer than a threshold.
#[derive(Clone, Debug)]
pub struct SlowTests {
    threshold: Duration,
}

impl SlowTests {
    pub fn new(threshold: Duration) -> Self {
        SlowTests { threshold }
    }
}

impl Default for SlowTests {
    fn default() -> Self {
        SlowTests::new(Duration::from_secs(1))
    }
}

impl TestMiddleware for SlowTests {
    fn run(&self, mut next: Next<'_, '_, Run>) {
        let started = Instant::now();
        next.proceed();
        let elapsed = started.elapsed();
        let test = next.test();
        if test.is_leaf() && elapsed > self.threshold {
            tracing::warn!(
                module = %test.module(),
                test = %test.full_name().join(" > "),
                ?elapsed,
                "slow test"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resolves_in_requested_order() {
        let registry = PluginRegistry::builtin();
        let names = vec!["slow-tests".to_owned(), "slow-tests".to_owned()];
        assert_eq!(registry.resolve(&names).map(|layers| layers.len()), Ok(2));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["slow-tests"]);
    }

    #[test]
    fn pipeline_puts_filter_first() {
        let registry = PluginRegistry::builtin();
        let config = RunConfig {
            filter: Some("math".to_owned()),
            plugins: vec!["slow-tests".to_owned()],
            ..RunConfig::in_process()
        };
        assert_eq!(registry.pipeline(&config).map(|p| p.len()), Ok(2));
        assert_eq!(
            registry.pipeline(&RunConfig::in_process()).map(|p| p.len()),
            Ok(0)
        );
    }

    #[test]
    fn unknown_and_failing_plugins_are_errors() {
        let mut registry = PluginRegistry::new();
        registry.register("broken", || Err("missing config".to_owned()));

        let unknown = registry.resolve(&["nope".to_owned()]).err();
        assert_eq!(unknown, Some(PluginError::Unknown("nope".to_owned())));

        let failed = registry.resolve(&["broken".to_owned()]).err();
        assert_eq!(
            failed.map(|error| error.to_string()),
            Some("plugin `broken` failed to load: missing config".to_owned())
        );
    }

    #[test]
    fn panicking_factory_fails_to_load() {
        let mut registry = PluginRegistry::new();
        registry.register("boom", || panic!("no config file"));

        let config = RunConfig {
            plugins: vec!["boom".to_owned()],
            ..RunConfig::in_process()
        };
        assert_eq!(
            registry.pipeline(&config).err(),
            Some(PluginError::Failed {
                name: "boom".to_owned(),
                reason: "no config file".to_owned(),
            })
        );
    }
}
