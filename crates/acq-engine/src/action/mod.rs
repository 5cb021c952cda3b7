//! Acquisition actions.
//!
//! An action drives a set of channels through one acquisition:
//!
//! ```text
//! ┌──────┐  begin()  ┌──────────┐  start ok  ┌───────────┐  loop exit  ┌───────────┐
//! │ Idle │──────────▶│ Starting │───────────▶│ Acquiring │────────────▶│ Finishing │
//! └──────┘           └────┬─────┘            └───────────┘             └─────┬─────┘
//!    ▲                    │ start error                                      │
//!    └────────────────────┴──────────────────────────────────────────────────┘
//!                                 ActiveGuard dropped
//! ```
//!
//! [`ActionCore::try_begin`] is the only way into `Starting`; it hands out an
//! [`ActiveGuard`] which returns the action to `Idle` when dropped, whatever
//! path the run took (success, error, cancelled task).
//!
//! Actions:
//! - [`counter_timer::AcquisitionRun`]: counter/timer acquisition, single
//!   shot or continuous depending on its [`counter_timer::RunFlavor`]
//! - [`zerod::ZeroDAcquisition`]: free-running 0D reads
//! - [`synch::TriggerGateGeneration`]: trigger/gate edge generation

/// Counter/timer acquisitions.
pub mod counter_timer;
/// Raw state and value reads.
pub mod readout;
/// Trigger/gate generation.
pub mod synch;
/// 0D acquisition.
pub mod zerod;

use acq_core::channel::Channel;
use acq_core::error::{AcqError, AcqResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle phase of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionPhase {
    /// Not running
    #[default]
    Idle,
    /// Sending the start sequence
    Starting,
    /// Polling
    Acquiring,
    /// Committing final states and values
    Finishing,
}

impl fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionPhase::Idle => write!(f, "idle"),
            ActionPhase::Starting => write!(f, "starting"),
            ActionPhase::Acquiring => write!(f, "acquiring"),
            ActionPhase::Finishing => write!(f, "finishing"),
        }
    }
}

/// State shared by every action: name, phase, running flag and the channels
/// the action may operate.
pub struct ActionCore {
    name: String,
    phase: Mutex<ActionPhase>,
    running: AtomicBool,
    elements: RwLock<IndexMap<String, Arc<Channel>>>,
}

impl ActionCore {
    /// Idle action named `name`.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            phase: Mutex::new(ActionPhase::Idle),
            running: AtomicBool::new(false),
            elements: RwLock::new(IndexMap::new()),
        })
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current phase.
    pub fn phase(&self) -> ActionPhase {
        *self.phase.lock()
    }

    /// Move to `phase`.
    pub fn set_phase(&self, phase: ActionPhase) {
        *self.phase.lock() = phase;
    }

    /// Whether the action is not idle.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enter `Starting`.
    ///
    /// # Errors
    /// `AcqError::ActionBusy` if the action is already in flight.
    pub fn try_begin(self: &Arc<Self>) -> AcqResult<ActiveGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AcqError::ActionBusy(self.name.clone()))?;
        self.set_phase(ActionPhase::Starting);
        Ok(ActiveGuard { core: self.clone() })
    }

    /// Track `channel`, replacing one with the same name.
    pub fn add_element(&self, channel: Arc<Channel>) {
        self.elements
            .write()
            .insert(channel.name().to_string(), channel);
    }

    /// Returns whether the element was known.
    pub fn remove_element(&self, name: &str) -> bool {
        self.elements.write().shift_remove(name).is_some()
    }

    /// Whether channel `name` is tracked.
    pub fn has_element(&self, name: &str) -> bool {
        self.elements.read().contains_key(name)
    }

    /// Elements in insertion order.
    pub fn elements(&self) -> Vec<Arc<Channel>> {
        self.elements.read().values().cloned().collect()
    }
}

impl fmt::Debug for ActionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionCore")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .field("running", &self.is_running())
            .field("elements", &self.elements.read().len())
            .finish()
    }
}

/// Proof that an action is in flight. Dropping it returns the action to
/// `Idle`.
#[must_use = "the action returns to idle as soon as the guard is dropped"]
pub struct ActiveGuard {
    core: Arc<ActionCore>,
}

impl ActiveGuard {
    /// Name of the guarded action.
    pub fn action(&self) -> &str {
        self.core.name()
    }

    /// Advance the guarded action's phase.
    pub fn set_phase(&self, phase: ActionPhase) {
        self.core.set_phase(phase);
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.core.set_phase(ActionPhase::Idle);
        self.core.running.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ActiveGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveGuard")
            .field("action", &self.core.name())
            .finish()
    }
}

/// An action another action stops when it finishes.
#[async_trait]
pub trait SlaveAction: Send + Sync {
    fn name(&self) -> &str;

    fn is_running(&self) -> bool;

    async fn stop_action(&self) -> AcqResult<()>;
}

/// Clear the operation marker of every channel.
pub(crate) fn clear_operations(channels: &[Arc<Channel>]) {
    for channel in channels {
        channel.clear_operation();
    }
}

/// Mark every channel as operated by `operation`. On conflict the markers
/// set by this call are cleared again.
pub(crate) fn mark_operations(channels: &[Arc<Channel>], operation: &str) -> AcqResult<()> {
    for (i, channel) in channels.iter().enumerate() {
        if let Err(err) = channel.set_operation(operation) {
            clear_operations(&channels[..i]);
            return Err(err);
        }
    }
    Ok(())
}
