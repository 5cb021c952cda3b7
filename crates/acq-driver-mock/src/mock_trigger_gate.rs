//! Simulated hardware trigger/gate generator.
//!
//! Generates the programmed edges on its own (no listener registration), so
//! the engine only sees it as busy for `offset + repetitions * (active +
//! passive)` seconds after `start_all`.

use crate::common::{CallLog, ErrorConfig, MockMode, TimingConfig};
use crate::sim_io::SimIo;
use acq_core::driver::{
    ControllerCapabilities, ControllerDriver, ControllerFactory, SynchDescription,
};
use acq_core::error::{DriverError, DriverErrorKind, DriverResult};
use acq_core::state::{ChannelState, StateInfo};
use acq_core::value::Payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DRIVER_TYPE: &str = "mock_trigger_gate";

/// Configuration for MockTriggerGate driver
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockTriggerGateConfig {
    /// Controller name
    #[serde(default)]
    pub name: Option<String>,
    /// Timing behaviour
    #[serde(default)]
    pub mode: MockMode,
}

/// Factory for creating MockTriggerGate instances.
pub struct MockTriggerGateFactory;

impl ControllerFactory for MockTriggerGateFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Mock Hardware Trigger/Gate"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let _: MockTriggerGateConfig = config.clone().try_into()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn ControllerDriver>>> {
        Box::pin(async move {
            let cfg: MockTriggerGateConfig = config
                .try_into()
                .context("invalid mock_trigger_gate configuration")?;
            let mut builder = MockTriggerGate::builder().mode(cfg.mode);
            if let Some(name) = cfg.name {
                builder = builder.name(name);
            }
            Ok(Arc::new(builder.build()) as Arc<dyn ControllerDriver>)
        })
    }
}

/// Builder for [`MockTriggerGate`].
#[derive(Debug, Default)]
pub struct MockTriggerGateBuilder {
    name: Option<String>,
    mode: MockMode,
    call_log: Option<CallLog>,
    errors: Option<ErrorConfig>,
}

impl MockTriggerGateBuilder {
    /// Controller name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Simulation mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Record calls into `log`.
    pub fn call_log(mut self, log: CallLog) -> Self {
        self.call_log = Some(log);
        self
    }

    /// Inject `errors`.
    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Build the controller.
    pub fn build(self) -> MockTriggerGate {
        MockTriggerGate {
            io: SimIo {
                name: self.name.unwrap_or_else(|| DRIVER_TYPE.to_string()),
                driver_type: DRIVER_TYPE,
                log: self.call_log.unwrap_or_default(),
                errors: SimIo::errors_for(self.mode, self.errors, None),
                mode: self.mode,
                timing: TimingConfig::trigger_gate(),
            },
            axes: Mutex::new(HashMap::new()),
            queued: Mutex::new(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AxisProgram {
    description: SynchDescription,
    started_at: Option<Instant>,
    stopped: bool,
}

impl AxisProgram {
    fn is_generating(&self) -> bool {
        match self.started_at {
            Some(start) if !self.stopped => {
                let total = Duration::from_secs_f64(self.description.total_time().max(0.0));
                start.elapsed() < total
            }
            _ => false,
        }
    }
}

/// Simulated hardware trigger/gate generator.
pub struct MockTriggerGate {
    io: SimIo,
    axes: Mutex<HashMap<u32, AxisProgram>>,
    queued: Mutex<Vec<u32>>,
}

impl MockTriggerGate {
    /// Start a builder.
    pub fn builder() -> MockTriggerGateBuilder {
        MockTriggerGateBuilder::default()
    }

    fn halt(&self, axis: Option<u32>) {
        let mut axes = self.axes.lock();
        for (n, program) in axes.iter_mut() {
            if axis.map_or(true, |a| a == *n) {
                program.stopped = true;
            }
        }
    }
}

#[async_trait]
impl ControllerDriver for MockTriggerGate {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn capabilities(&self) -> ControllerCapabilities {
        ControllerCapabilities::trigger_gate(false)
    }

    async fn synch_one(&self, axis: u32, description: &SynchDescription) -> DriverResult<()> {
        self.io.call("synch_one", Some(axis)).await?;
        self.axes.lock().insert(
            axis,
            AxisProgram {
                description: *description,
                started_at: None,
                stopped: false,
            },
        );
        Ok(())
    }

    async fn pre_start_all(&self) -> DriverResult<()> {
        self.io.call("pre_start_all", None).await?;
        self.queued.lock().clear();
        Ok(())
    }

    async fn pre_start_one(&self, axis: u32, _value: f64) -> DriverResult<bool> {
        self.io.call("pre_start_one", Some(axis)).await?;
        Ok(self.io.errors.is_ready("pre_start_one"))
    }

    async fn start_one(&self, axis: u32, _value: f64) -> DriverResult<()> {
        self.io.call("start_one", Some(axis)).await?;
        if !self.axes.lock().contains_key(&axis) {
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
        self.io.call("start_all", None).await?;
        let now = Instant::now();
        let queued: Vec<u32> = self.queued.lock().drain(..).collect();
        let mut axes = self.axes.lock();
        for axis in queued {
            if let Some(program) = axes.get_mut(&axis) {
                program.started_at = Some(now);
                program.stopped = false;
            }
        }
        Ok(())
    }

    async fn state_one(&self, axis: u32) -> DriverResult<StateInfo> {
        self.io.call("state_one", Some(axis)).await?;
        let generating = self
            .axes
            .lock()
            .get(&axis)
            .is_some_and(AxisProgram::is_generating);
        if generating {
            Ok(StateInfo::new(ChannelState::Moving, "generating"))
        } else {
            Ok(StateInfo::new(ChannelState::On, "ready"))
        }
    }

    async fn read_one(&self, axis: u32) -> DriverResult<Payload> {
        self.io.call("read_one", Some(axis)).await?;
        Ok(Payload::Empty)
    }

    async fn stop_one(&self, axis: u32) -> DriverResult<()> {
        self.io.call("stop_one", Some(axis)).await?;
        self.halt(Some(axis));
        Ok(())
    }

    async fn abort_one(&self, axis: u32) -> DriverResult<()> {
        self.io.call("abort_one", Some(axis)).await?;
        self.halt(Some(axis));
        Ok(())
    }

    async fn stop_all(&self) -> DriverResult<()> {
        self.io.call("stop_all", None).await?;
        self.halt(None);
        Ok(())
    }

    async fn abort_all(&self) -> DriverResult<()> {
        self.io.call("abort_all", None).await?;
        self.halt(None);
        Ok(())
    }
}
