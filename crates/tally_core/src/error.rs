//! Test failures and plugin errors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A recorded test failure.
///
/// Failures are data: they are attached to the node that raised them and
/// travel inside [`TestEvent::TestRun`](crate::TestEvent::TestRun).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestError {
    pub message: String,
    /// Panic location and backtrace, when one was captured.
    pub stack: Option<String>,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        TestError {
            message: message.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TestError {}

/// Values a test body may return.
///
/// A body passes by returning `()` or `Ok(())`; panicking fails it as well.
pub trait Outcome {
    fn into_error(self) -> Option<TestError>;
}

impl Outcome for () {
    fn into_error(self) -> Option<TestError> {
        None
    }
}

impl<E: fmt::Display> Outcome for Result<(), E> {
    fn into_error(self) -> Option<TestError> {
        self.err().map(|error| TestError::new(error.to_string()))
    }
}

/// A configured plugin could not be instantiated.
///
/// Always fatal for the whole run.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    #[error("unknown plugin `{0}`")]
    Unknown(String),

    #[error("plugin `{name}` failed to load: {reason}")]
    Failed { name: String, reason: String },
}
