//! Process-wide console backed by `tracing`.

use std::sync::atomic::{AtomicU8, Ordering};

use super::ConsoleThreshold;
use crate::domain::Priority;

/// Console with an adjustable minimum priority.
///
/// Lines at or above the threshold are forwarded to `tracing` at the
/// matching level.
#[derive(Debug)]
pub struct Console {
    min_priority: AtomicU8,
}

impl Console {
    /// Creates a console that prints `min_priority` and above.
    #[must_use]
    pub const fn new(min_priority: Priority) -> Self {
        Self {
            min_priority: AtomicU8::new(min_priority.as_u8()),
        }
    }

    /// Current threshold.
    #[must_use]
    pub fn min_priority(&self) -> Priority {
        Priority::from_wire(self.min_priority.load(Ordering::SeqCst))
    }

    /// Overrides the threshold in either direction.
    pub fn set_min_priority(&self, priority: Priority) {
        self.min_priority.store(priority.as_u8(), Ordering::SeqCst);
    }

    /// Prints `message` if `priority` passes the threshold.
    /// Returns whether it was printed.
    pub fn log(&self, priority: Priority, message: &str) -> bool {
        if priority == Priority::Silent || priority < self.min_priority() {
            return false;
        }
        match priority {
            Priority::Debug => tracing::debug!(target: "console", "{message}"),
            Priority::Log => tracing::info!(target: "console", "{message}"),
            Priority::Warning => tracing::warn!(target: "console", "{message}"),
            Priority::Error | Priority::Silent => tracing::error!(target: "console", "{message}"),
        }
        true
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(Priority::Log)
    }
}

impl ConsoleThreshold for Console {
    fn lower_min_priority(&self, at_most: Priority) {
        self.min_priority.fetch_min(at_most.as_u8(), Ordering::SeqCst);
    }
}
