//! Channels: the System-of-Record for the last state and value read.
//!
//! A [`Channel`] is mutated by the acquisition action that currently operates
//! it and fans out every commit to subscribers through a broadcast channel.
//! State, value and sequence number live behind one lock so the order in
//! which commits happen is the order in which events are published.

use crate::accumulation::{Accumulation, AccumulationKind};
use crate::controller::Controller;
use crate::error::{AcqError, AcqResult};
use crate::event::{ChannelEvent, ChannelEventKind, ValueEvent, EVENT_CHANNEL_CAPACITY};
use crate::state::{ChannelState, Propagate, StateInfo};
use crate::value::{IndexedValue, Payload, ValueBuffer, ValueReading};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Kind of measurable element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Timerable counter/timer channel.
    CounterTimer,
    /// Passive integrating channel.
    ZeroD,
    /// Trigger/gate generator element.
    TriggerGate,
}

/// How a controller's channels are clocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Each repetition is started by software.
    #[default]
    Software,
    /// Each repetition is started by an external hardware edge.
    HardwareTrigger,
    /// Each repetition lasts as long as an external hardware gate.
    HardwareGate,
    /// Not configured yet
    Unknown,
}

impl TriggerType {
    /// Value sent with `SetCtrlPar("synchronization", ...)`.
    pub fn as_par(self) -> &'static str {
        match self {
            TriggerType::Software => "software",
            TriggerType::HardwareTrigger => "hardware_trigger",
            TriggerType::HardwareGate => "hardware_gate",
            TriggerType::Unknown => "unknown",
        }
    }

    /// Whether an external signal paces the channel.
    pub fn is_hardware(self) -> bool {
        matches!(self, TriggerType::HardwareTrigger | TriggerType::HardwareGate)
    }
}

struct ChannelInner {
    state: StateInfo,
    value: Option<ValueReading>,
    buffer: ValueBuffer,
    accumulation: Accumulation,
    operation: Option<String>,
    seq: u64,
}

/// A logical measurable element owned by a controller.
pub struct Channel {
    name: String,
    axis: u32,
    kind: ChannelKind,
    controller: Arc<Controller>,
    enabled: AtomicBool,
    trigger_type: RwLock<TriggerType>,
    inner: Mutex<ChannelInner>,
    events: broadcast::Sender<ChannelEvent>,
}

impl Channel {
    /// Channel `axis` of `controller`, enabled, with software trigger type.
    pub fn new(
        name: impl Into<String>,
        axis: u32,
        kind: ChannelKind,
        controller: Arc<Controller>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            axis,
            kind,
            controller,
            enabled: AtomicBool::new(true),
            trigger_type: RwLock::new(TriggerType::default()),
            inner: Mutex::new(ChannelInner {
                state: StateInfo::default(),
                value: None,
                buffer: ValueBuffer::new(),
                accumulation: Accumulation::default(),
                operation: None,
                seq: 0,
            }),
            events,
        }
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Axis on the owning controller.
    pub fn axis(&self) -> u32 {
        self.axis
    }

    /// Category.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Owning controller.
    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Whether runs of its measurement group include the channel.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Include or exclude the channel.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Pacing.
    pub fn trigger_type(&self) -> TriggerType {
        *self.trigger_type.read()
    }

    /// Change how the channel is paced.
    pub fn set_trigger_type(&self, trigger_type: TriggerType) {
        *self.trigger_type.write() = trigger_type;
    }

    /// How 0D readings are combined.
    pub fn set_accumulation_kind(&self, kind: AccumulationKind) {
        self.inner.lock().accumulation.set_kind(kind);
    }

    /// Subscribe to state and value commits.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Committed state.
    pub fn state(&self) -> ChannelState {
        self.inner.lock().state.state
    }

    /// Committed state with status and error.
    pub fn state_info(&self) -> StateInfo {
        self.inner.lock().state.clone()
    }

    /// Commit a state.
    pub fn set_state_info(&self, info: StateInfo, propagate: Propagate) {
        let mut inner = self.inner.lock();
        let changed = inner.state != info;
        inner.state = info.clone();
        if should_emit(propagate, changed) {
            self.emit(&mut inner, propagate, ChannelEventKind::State(info));
        }
    }

    /// Commit `state` with an empty status.
    pub fn set_state(&self, state: ChannelState, propagate: Propagate) {
        self.set_state_info(StateInfo::from_state(state), propagate);
    }

    /// Current state as reported to clients once no operation is in progress.
    ///
    /// A channel still marked busy after its operation was cleared means the
    /// last read raced with the finish; it is reported as idle. Empty status
    /// texts are filled in.
    pub fn translated_state_info(&self) -> StateInfo {
        let inner = self.inner.lock();
        let mut info = inner.state.clone();
        if inner.operation.is_none() && info.state.is_busy() {
            info.state = ChannelState::On;
        }
        if info.status.is_empty() {
            info.status = format!("{} is {}", self.name, info.state);
        }
        info
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    /// Last committed value.
    pub fn value(&self) -> Option<ValueReading> {
        self.inner.lock().value.clone()
    }

    /// Copy of the indexed value buffer.
    pub fn value_buffer(&self) -> Vec<IndexedValue> {
        self.inner.lock().buffer.as_slice().to_vec()
    }

    /// Forget every indexed value.
    pub fn clear_value_buffer(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.accumulation.clear();
    }

    /// Commit a value read from the driver.
    ///
    /// Chunks are appended to the buffer after its last index; indexed
    /// payloads must continue the buffer in strictly increasing order or the
    /// whole reading is rejected.
    pub fn put_value(&self, reading: ValueReading, propagate: Propagate) -> AcqResult<()> {
        let mut inner = self.inner.lock();
        let appended = match &reading.payload {
            Payload::Chunk(_) | Payload::Indexed(_) if !reading.is_error() => {
                let first = inner.buffer.next_index();
                let samples = reading.payload.clone().into_indexed(first);
                if let Err(err) = inner.buffer.append(&self.name, &samples) {
                    warn!(channel = %self.name, error = %err, "Rejected out-of-order value");
                    return Err(err);
                }
                samples
            }
            _ => Vec::new(),
        };
        let changed = inner.value.as_ref() != Some(&reading) || !appended.is_empty();
        inner.value = Some(reading.clone());
        if should_emit(propagate, changed) {
            let state = inner.state.state;
            self.emit(
                &mut inner,
                propagate,
                ChannelEventKind::Value(ValueEvent {
                    reading,
                    appended,
                    state,
                }),
            );
        }
        Ok(())
    }

    /// Accumulate a 0D sample and commit the accumulated value.
    pub fn put_current_value(&self, sample: ValueReading, propagate: Propagate) {
        let mut inner = self.inner.lock();
        let committed = if sample.is_error() {
            sample
        } else {
            if let Some(value) = sample.payload.last() {
                inner.accumulation.push(value, sample.timestamp);
            }
            match inner.accumulation.value() {
                Some(value) => ValueReading {
                    payload: Payload::Scalar(value),
                    timestamp: sample.timestamp,
                    error: None,
                },
                None => ValueReading::new(Payload::Empty),
            }
        };
        let changed = inner.value.as_ref() != Some(&committed);
        inner.value = Some(committed.clone());
        if should_emit(propagate, changed) {
            let state = inner.state.state;
            self.emit(
                &mut inner,
                propagate,
                ChannelEventKind::Value(ValueEvent {
                    reading: committed,
                    appended: Vec::new(),
                    state,
                }),
            );
        }
    }

    // -------------------------------------------------------------------------
    // Operation marker
    // -------------------------------------------------------------------------

    /// Mark the channel as involved in `operation`.
    pub fn set_operation(&self, operation: &str) -> AcqResult<()> {
        let mut inner = self.inner.lock();
        if let Some(current) = &inner.operation {
            return Err(AcqError::ChannelBusy {
                channel: self.name.clone(),
                operation: current.clone(),
            });
        }
        inner.operation = Some(operation.to_string());
        Ok(())
    }

    /// Release the channel from its action.
    pub fn clear_operation(&self) {
        self.inner.lock().operation = None;
    }

    /// Name of the action operating the channel, if any.
    pub fn operation(&self) -> Option<String> {
        self.inner.lock().operation.clone()
    }

    fn emit(&self, inner: &mut ChannelInner, propagate: Propagate, kind: ChannelEventKind) {
        inner.seq += 1;
        let event = ChannelEvent {
            channel: self.name.clone(),
            seq: inner.seq,
            priority: propagate == Propagate::Priority,
            timestamp: Utc::now(),
            kind,
        };
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

fn should_emit(propagate: Propagate, changed: bool) -> bool {
    match propagate {
        Propagate::None => false,
        Propagate::Changed => changed,
        Propagate::Priority => true,
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("axis", &self.axis)
            .field("kind", &self.kind)
            .field("controller", &self.controller.name())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
