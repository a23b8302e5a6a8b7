use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tally_core::ModuleId;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Trailing-edge debouncer for modules awaiting a re-run.
///
/// Every push restarts the window; the accumulated set becomes ready once
/// the window passes without further pushes.
#[derive(Clone, Debug)]
pub struct Debouncer {
    window: Duration,
    pending: BTreeSet<ModuleId>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: BTreeSet::new(),
            deadline: None,
        }
    }

    pub fn push(&mut self, modules: impl IntoIterator<Item = ModuleId>, now: Instant) {
        self.pending.extend(modules);
        if !self.pending.is_empty() {
            self.deadline = Some(now + self.window);
        }
    }

    /// When the pending set becomes ready, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the pending modules if the window has passed.
    pub fn take_ready(&mut self, now: Instant) -> Option<Vec<ModuleId>> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(std::mem::take(&mut self.pending).into_iter().collect())
            }
            _ => None,
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Debouncer::new(DEFAULT_DEBOUNCE)
    }
}
