//! Channel states and state propagation.
//!
//! Drivers report a [`StateInfo`] per axis. The engine only cares about one
//! binary question, [`ChannelState::is_busy`], to decide whether an
//! acquisition is still in progress; the rest of the state is forwarded to
//! listeners untouched.

use crate::error::DriverError;
use serde::{Deserialize, Serialize};

/// State of a channel (or of an aggregate of channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Idle and ready.
    On,
    /// Powered off or disconnected.
    Off,
    /// Acquiring / integrating / generating.
    Moving,
    /// Running a long operation other than an acquisition.
    Running,
    /// Ready but not operational (e.g. waiting for an external condition).
    Standby,
    /// Operational with a warning condition.
    Alarm,
    /// Failed; the status carries the reason.
    Fault,
    /// Disabled by configuration.
    Disable,
    /// Never read or unreadable.
    #[default]
    Unknown,
}

impl ChannelState {
    /// Whether this state means "acquisition still in progress".
    pub fn is_busy(self) -> bool {
        matches!(self, ChannelState::Moving | ChannelState::Running)
    }

    /// Lower-case name used in status strings and logs.
    pub fn label(self) -> &'static str {
        match self {
            ChannelState::On => "on",
            ChannelState::Off => "off",
            ChannelState::Moving => "moving",
            ChannelState::Running => "running",
            ChannelState::Standby => "standby",
            ChannelState::Alarm => "alarm",
            ChannelState::Fault => "fault",
            ChannelState::Disable => "disable",
            ChannelState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// State plus human-readable status, optionally carrying the driver error
/// that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StateInfo {
    /// State.
    pub state: ChannelState,
    /// Free text from the driver.
    pub status: String,
    /// Driver error behind a fault.
    #[serde(skip)]
    pub error: Option<DriverError>,
}

impl StateInfo {
    /// State with a status text.
    pub fn new(state: ChannelState, status: impl Into<String>) -> Self {
        Self {
            state,
            status: status.into(),
            error: None,
        }
    }

    /// State info without a status text.
    pub fn from_state(state: ChannelState) -> Self {
        Self::new(state, String::new())
    }

    /// Fault state carrying the driver error that caused it.
    pub fn fault(error: &DriverError) -> Self {
        Self {
            state: ChannelState::Fault,
            status: error.to_string(),
            error: Some(error.clone()),
        }
    }

    /// Whether the state is Moving or Running.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }
}

/// How a state or value commit is announced to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagate {
    /// Commit silently.
    None,
    /// Emit an event only if the committed data changed.
    Changed,
    /// Always emit, flagged as priority.
    Priority,
}
