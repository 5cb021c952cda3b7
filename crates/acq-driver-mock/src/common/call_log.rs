//! Shared record of driver calls.
//!
//! Several simulated controllers can record into the same [`CallLog`], which
//! makes the global call order across controllers observable in tests.

use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Controller name.
    pub controller: String,
    /// Driver operation name.
    pub operation: &'static str,
    /// Axis for `*_one` calls.
    pub axis: Option<u32>,
}

/// Cloneable handle to a shared call record.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call.
    pub fn record(&self, controller: &str, operation: &'static str, axis: Option<u32>) {
        self.calls.lock().push(Call {
            controller: controller.to_string(),
            operation,
            axis,
        });
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Position of the last matching call.
    pub fn last_position(
        &self,
        controller: &str,
        operation: &str,
        axis: Option<u32>,
    ) -> Option<usize> {
        self.calls
            .lock()
            .iter()
            .rposition(|c| c.controller == controller && c.operation == operation && c.axis == axis)
    }

    /// Number of calls of `operation` on `controller`, any axis.
    pub fn count(&self, controller: &str, operation: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.controller == controller && c.operation == operation)
            .count()
    }

    /// Controllers that received `operation`, in call order.
    pub fn controllers_for(&self, operation: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.controller.clone())
            .collect()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}
