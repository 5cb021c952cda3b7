//! Software trigger/gate generator.
//!
//! A controller driver with no hardware behind it: each started axis runs a
//! generator task that emits [`EdgeEvent`]s to the registered listeners on a
//! fixed time grid:
//!
//! ```text
//!  offset   active   passive   active   passive
//! ├────────┼────────┼─────────┼────────┼─────────┤
//!          A(0)     P(0)      A(1)     P(1)      done
//! ```
//!
//! Deadlines are computed from the start instant, so slow listeners delay
//! individual edges but never accumulate drift. Listeners are called outside
//! any lock and must return quickly.

use acq_core::driver::{
    ControllerCapabilities, ControllerDriver, ControllerFactory, EdgeEvent, EdgeListener,
    SynchDescription,
};
use acq_core::error::{DriverError, DriverErrorKind, DriverResult};
use acq_core::state::{ChannelState, StateInfo};
use acq_core::value::Payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, Instrument};

/// Driver type of the software trigger/gate controller.
pub const DRIVER_TYPE: &str = "software_trigger_gate";

/// Configuration for [`SoftwareTriggerGate`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoftwareTriggerGateConfig {
    /// Controller name
    #[serde(default)]
    pub name: Option<String>,
}

/// Factory for [`SoftwareTriggerGate`]; always available in the registry.
pub struct SoftwareTriggerGateFactory;

impl ControllerFactory for SoftwareTriggerGateFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Software Trigger/Gate"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: SoftwareTriggerGateConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn ControllerDriver>>> {
        Box::pin(async move {
            let cfg: SoftwareTriggerGateConfig = config
                .try_into()
                .context("invalid software_trigger_gate configuration")?;
            let gate = SoftwareTriggerGate::new(cfg.name.unwrap_or_else(|| DRIVER_TYPE.to_string()));
            Ok(Arc::new(gate) as Arc<dyn ControllerDriver>)
        })
    }
}

type Listeners = Arc<RwLock<Vec<Arc<dyn EdgeListener>>>>;

#[derive(Default)]
struct AxisSlot {
    description: Option<SynchDescription>,
    generating: Arc<AtomicBool>,
    generator: Option<JoinHandle<()>>,
}

impl AxisSlot {
    fn halt(&mut self) {
        if let Some(generator) = self.generator.take() {
            generator.abort();
        }
        self.generating.store(false, Ordering::Release);
    }
}

/// Trigger/gate controller generating edges in software.
pub struct SoftwareTriggerGate {
    name: String,
    listeners: Listeners,
    axes: Mutex<HashMap<u32, AxisSlot>>,
    queued: Mutex<Vec<u32>>,
}

impl SoftwareTriggerGate {
    /// Generator named `name`, with no axis programmed.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: Arc::new(RwLock::new(Vec::new())),
            axes: Mutex::new(HashMap::new()),
            queued: Mutex::new(Vec::new()),
        }
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registered edge listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn is_generating(&self, axis: u32) -> bool {
        self.axes
            .lock()
            .get(&axis)
            .is_some_and(|slot| slot.generating.load(Ordering::Acquire))
    }

    fn halt(&self, axis: Option<u32>) {
        let mut axes = self.axes.lock();
        for (n, slot) in axes.iter_mut() {
            if axis.map_or(true, |a| a == *n) {
                slot.halt();
            }
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

fn emit(listeners: &Listeners, event: EdgeEvent) {
    let listeners = listeners.read().clone();
    trace!(?event, listeners = listeners.len(), "Edge");
    for listener in listeners {
        listener.edge_received(event);
    }
}

async fn generate(description: SynchDescription, listeners: Listeners, generating: Arc<AtomicBool>) {
    let mut deadline = Instant::now() + seconds(description.offset);
    for index in 0..description.repetitions {
        sleep_until(deadline).await;
        emit(&listeners, EdgeEvent::active(index));
        deadline += seconds(description.active);
        sleep_until(deadline).await;
        emit(&listeners, EdgeEvent::passive(index));
        deadline += seconds(description.passive);
    }
    sleep_until(deadline).await;
    generating.store(false, Ordering::Release);
}

fn validate_description(description: &SynchDescription) -> DriverResult<()> {
    let times = [description.offset, description.active, description.passive];
    if times.iter().any(|t| !t.is_finite() || *t < 0.0) || description.active <= 0.0 {
        return Err(DriverError::new(
            DRIVER_TYPE,
            DriverErrorKind::InvalidParameter,
            format!("invalid synchronization {:?}", description),
        ));
    }
    Ok(())
}

#[async_trait]
impl ControllerDriver for SoftwareTriggerGate {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn capabilities(&self) -> ControllerCapabilities {
        ControllerCapabilities::trigger_gate(true)
    }

    async fn synch_one(&self, axis: u32, description: &SynchDescription) -> DriverResult<()> {
        validate_description(description)?;
        let mut axes = self.axes.lock();
        let slot = axes.entry(axis).or_default();
        slot.halt();
        slot.description = Some(*description);
        Ok(())
    }

    async fn pre_start_all(&self) -> DriverResult<()> {
        self.queued.lock().clear();
        Ok(())
    }

    async fn start_one(&self, axis: u32, _value: f64) -> DriverResult<()> {
        let programmed = self
            .axes
            .lock()
            .get(&axis)
            .is_some_and(|slot| slot.description.is_some());
        if !programmed {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::Configuration,
                format!("axis {} was not programmed", axis),
            ));
        }
        self.queued.lock().push(axis);
        Ok(())
    }

    async fn start_all(&self) -> DriverResult<()> {
        let queued: Vec<u32> = self.queued.lock().drain(..).collect();
        let mut axes = self.axes.lock();
        for axis in queued {
            let Some(slot) = axes.get_mut(&axis) else { continue };
            let Some(description) = slot.description else { continue };
            slot.halt();
            slot.generating.store(true, Ordering::Release);
            debug!(controller = %self.name, axis, repetitions = description.repetitions, "Generator started");
            // edges are handled in the span of the run that started them
            slot.generator = Some(tokio::spawn(
                generate(description, self.listeners.clone(), slot.generating.clone())
                    .in_current_span(),
            ));
        }
        Ok(())
    }

    async fn state_one(&self, axis: u32) -> DriverResult<StateInfo> {
        let state = if self.is_generating(axis) {
            ChannelState::Moving
        } else {
            ChannelState::On
        };
        Ok(StateInfo::from_state(state))
    }

    async fn read_one(&self, _axis: u32) -> DriverResult<Payload> {
        Ok(Payload::Empty)
    }

    async fn stop_one(&self, axis: u32) -> DriverResult<()> {
        self.halt(Some(axis));
        Ok(())
    }

    async fn stop_all(&self) -> DriverResult<()> {
        self.halt(None);
        Ok(())
    }

    async fn abort_one(&self, axis: u32) -> DriverResult<()> {
        self.halt(Some(axis));
        Ok(())
    }

    async fn abort_all(&self) -> DriverResult<()> {
        self.halt(None);
        Ok(())
    }

    fn add_listener(&self, listener: Arc<dyn EdgeListener>) -> DriverResult<()> {
        self.listeners.write().push(listener);
        Ok(())
    }

    fn remove_listeners(&self) -> DriverResult<()> {
        self.listeners.write().clear();
        Ok(())
    }
}

impl Drop for SoftwareTriggerGate {
    fn drop(&mut self) {
        self.halt(None);
    }
}
