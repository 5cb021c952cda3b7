//! Push events emitted by channels.
//!
//! Each channel owns a `tokio::sync::broadcast` sender. Consumers (recorders,
//! GUIs, tests) subscribe and receive [`ChannelEvent`]s in commit order; the
//! per-channel `seq` number makes that order observable.

use crate::state::{ChannelState, StateInfo};
use crate::value::{IndexedValue, ValueReading};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Capacity of each channel's broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Event published by a channel when its state or value is committed.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelEvent {
    /// Name of the emitting channel.
    pub channel: String,
    /// Strictly increasing per channel.
    pub seq: u64,
    /// Whether the commit requested priority propagation.
    pub priority: bool,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Category.
    pub kind: ChannelEventKind,
}

/// Payload of a [`ChannelEvent`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEventKind {
    /// A committed state
    State(StateInfo),
    /// A committed value
    Value(ValueEvent),
}

/// A committed value.
#[derive(Debug, Clone, Serialize)]
pub struct ValueEvent {
    /// The committed reading.
    pub reading: ValueReading,
    /// Buffer entries appended by this commit (empty for scalar commits).
    pub appended: Vec<IndexedValue>,
    /// Channel state at the time the value was committed.
    pub state: ChannelState,
}

impl ChannelEvent {
    /// Whether this is a state event.
    pub fn is_state(&self) -> bool {
        matches!(self.kind, ChannelEventKind::State(_))
    }

    /// Whether this is a value event.
    pub fn is_value(&self) -> bool {
        matches!(self.kind, ChannelEventKind::Value(_))
    }
}
