//! Simulated counter/timer controller.
//!
//! Behaves like a multi-channel counter card sharing one internal clock:
//!
//! - The master value loaded with `load_one` is an integration time in
//!   seconds (positive) or a monitor count (negative, `-counts`). A monitor
//!   count of N lasts `N / count_rate` seconds.
//! - `start_all` starts every axis queued by `start_one` at the same instant.
//! - With `synchronization = "software"` one start is one integration and
//!   `read_one` returns a scalar. With a hardware synchronization the card
//!   self-paces `repetitions` integrations separated by `latency_time` and
//!   `read_one` returns the repetitions completed since the previous read
//!   (possibly none).
//! - The master axis reports elapsed time (timer) or monitor counts; the
//!   other axes count at `count_rate * axis` with optional noise.
//!
//! # Example
//!
//! ```rust,ignore
//! use acq_driver_mock::{CallLog, MockCounterTimer};
//!
//! let log = CallLog::new();
//! let ctrl = MockCounterTimer::builder()
//!     .name("ctctrl01")
//!     .count_rate(1000.0)
//!     .call_log(log.clone())
//!     .build();
//! ```

use crate::common::{CallLog, ErrorConfig, MockMode, MockRng, TimingConfig};
use crate::sim_io::SimIo;
use acq_core::channel::TriggerType;
use acq_core::driver::{ControllerCapabilities, ControllerDriver, ControllerFactory};
use acq_core::error::{DriverError, DriverErrorKind, DriverResult};
use acq_core::state::{ChannelState, StateInfo};
use acq_core::value::Payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

const DRIVER_TYPE: &str = "mock_counter_timer";

// =============================================================================
// MockCounterTimerFactory - ControllerFactory implementation
// =============================================================================

/// Configuration for MockCounterTimer driver
#[derive(Debug, Clone, Deserialize)]
pub struct MockCounterTimerConfig {
    /// Controller name used in the call log
    #[serde(default)]
    pub name: Option<String>,
    /// Counts per second per axis unit (default: 1000.0)
    #[serde(default = "default_count_rate")]
    pub count_rate: f64,
    /// Noise amplitude added to counts (default: 0.0)
    #[serde(default)]
    pub noise: f64,
    /// Timing and failure behaviour
    #[serde(default)]
    pub mode: MockMode,
    /// RNG seed for noise
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_count_rate() -> f64 {
    1000.0
}

/// Factory for creating MockCounterTimer instances.
pub struct MockCounterTimerFactory;

impl ControllerFactory for MockCounterTimerFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Mock Counter/Timer"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockCounterTimerConfig = config.clone().try_into()?;
        anyhow::ensure!(cfg.count_rate > 0.0, "count_rate must be positive");
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn ControllerDriver>>> {
        Box::pin(async move {
            let cfg: MockCounterTimerConfig = config
                .try_into()
                .context("invalid mock_counter_timer configuration")?;
            let mut builder = MockCounterTimer::builder()
                .count_rate(cfg.count_rate)
                .noise(cfg.noise)
                .mode(cfg.mode);
            if let Some(name) = cfg.name {
                builder = builder.name(name);
            }
            if let Some(seed) = cfg.seed {
                builder = builder.seed(seed);
            }
            Ok(Arc::new(builder.build()) as Arc<dyn ControllerDriver>)
        })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MockCounterTimer`].
#[derive(Debug, Default)]
pub struct MockCounterTimerBuilder {
    name: Option<String>,
    count_rate: Option<f64>,
    noise: f64,
    mode: MockMode,
    seed: Option<u64>,
    call_log: Option<CallLog>,
    errors: Option<ErrorConfig>,
}

impl MockCounterTimerBuilder {
    /// Controller name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Counts per second per axis number.
    pub fn count_rate(mut self, rate: f64) -> Self {
        self.count_rate = Some(rate);
        self
    }

    /// Noise amplitude.
    pub fn noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    /// Simulation mode.
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Seed the noise.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
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
    pub fn build(self) -> MockCounterTimer {
        MockCounterTimer {
            io: SimIo {
                name: self.name.unwrap_or_else(|| DRIVER_TYPE.to_string()),
                driver_type: DRIVER_TYPE,
                log: self.call_log.unwrap_or_default(),
                errors: SimIo::errors_for(self.mode, self.errors, self.seed),
                mode: self.mode,
                timing: TimingConfig::counter_timer(),
            },
            rng: MockRng::new(self.seed),
            count_rate: self.count_rate.unwrap_or_else(default_count_rate),
            noise: self.noise,
            state: Mutex::new(CardState::default()),
        }
    }
}

// =============================================================================
// MockCounterTimer
// =============================================================================

#[derive(Debug)]
struct CardState {
    master: Option<(u32, f64)>,
    repetitions: u64,
    latency_time: f64,
    synchronization: TriggerType,
    queued: Vec<u32>,
    started: BTreeSet<u32>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    delivered: HashMap<u32, u64>,
}

impl Default for CardState {
    fn default() -> Self {
        Self {
            master: None,
            repetitions: 1,
            latency_time: 0.0,
            synchronization: TriggerType::Software,
            queued: Vec::new(),
            started: BTreeSet::new(),
            started_at: None,
            stopped_at: None,
            delivered: HashMap::new(),
        }
    }
}

/// Simulated counter/timer card.
pub struct MockCounterTimer {
    io: SimIo,
    rng: MockRng,
    count_rate: f64,
    noise: f64,
    state: Mutex<CardState>,
}

impl MockCounterTimer {
    /// Start a builder.
    pub fn builder() -> MockCounterTimerBuilder {
        MockCounterTimerBuilder::default()
    }

    /// Call log of this controller.
    pub fn call_log(&self) -> &CallLog {
        &self.io.log
    }

    fn integration_time(&self, st: &CardState) -> f64 {
        match st.master {
            Some((_, value)) if value >= 0.0 => value,
            Some((_, value)) => -value / self.count_rate,
            None => 0.0,
        }
    }

    fn period(&self, st: &CardState) -> f64 {
        self.integration_time(st) + st.latency_time
    }

    fn total_time(&self, st: &CardState) -> f64 {
        if st.synchronization.is_hardware() {
            st.repetitions.max(1) as f64 * self.period(st)
        } else {
            self.integration_time(st)
        }
    }

    fn elapsed(st: &CardState) -> f64 {
        match st.started_at {
            Some(start) => {
                let end = st.stopped_at.unwrap_or_else(Instant::now);
                end.saturating_duration_since(start).as_secs_f64()
            }
            None => 0.0,
        }
    }

    fn is_acquiring(&self, st: &CardState) -> bool {
        st.started_at.is_some()
            && st.stopped_at.is_none()
            && Self::elapsed(st) < self.total_time(st)
    }

    fn completed_repetitions(&self, st: &CardState) -> u64 {
        let period = self.period(st);
        if st.started_at.is_none() {
            return 0;
        }
        if period <= 0.0 || Self::elapsed(st) >= self.total_time(st) {
            return st.repetitions;
        }
        ((Self::elapsed(st) / period).floor() as u64).min(st.repetitions)
    }

    /// Value of `axis` after integrating for `t` seconds.
    fn sample(&self, st: &CardState, axis: u32, t: f64) -> f64 {
        match st.master {
            Some((master, value)) if master == axis && value >= 0.0 => t,
            Some((master, _)) if master == axis => (self.count_rate * t).round(),
            _ => self.count_rate * axis as f64 * t + self.rng.noise(self.noise),
        }
    }
}

#[async_trait]
impl ControllerDriver for MockCounterTimer {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn capabilities(&self) -> ControllerCapabilities {
        ControllerCapabilities::counter_timer()
    }

    async fn pre_load_all(&self) -> DriverResult<()> {
        self.io.call("pre_load_all", None).await
    }

    async fn pre_load_one(&self, axis: u32, _value: f64) -> DriverResult<bool> {
        self.io.call("pre_load_one", Some(axis)).await?;
        Ok(self.io.errors.is_ready("pre_load_one"))
    }

    async fn load_one(&self, axis: u32, value: f64) -> DriverResult<()> {
        self.io.call("load_one", Some(axis)).await?;
        if value == 0.0 {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                "master value must not be zero",
            ));
        }
        self.state.lock().master = Some((axis, value));
        Ok(())
    }

    async fn load_all(&self) -> DriverResult<()> {
        self.io.call("load_all", None).await
    }

    async fn pre_start_all(&self) -> DriverResult<()> {
        self.io.call("pre_start_all", None).await?;
        self.state.lock().queued.clear();
        Ok(())
    }

    async fn pre_start_one(&self, axis: u32, _value: f64) -> DriverResult<bool> {
        self.io.call("pre_start_one", Some(axis)).await?;
        Ok(self.io.errors.is_ready("pre_start_one"))
    }

    async fn start_one(&self, axis: u32, _value: f64) -> DriverResult<()> {
        self.io.call("start_one", Some(axis)).await?;
        self.state.lock().queued.push(axis);
        Ok(())
    }

    async fn start_all(&self) -> DriverResult<()> {
        self.io.call("start_all", None).await?;
        let mut st = self.state.lock();
        st.started = st.queued.drain(..).collect();
        st.started_at = Some(Instant::now());
        st.stopped_at = None;
        st.delivered.clear();
        Ok(())
    }

    async fn pre_state_all(&self) -> DriverResult<()> {
        self.io.call("pre_state_all", None).await
    }

    async fn state_all(&self) -> DriverResult<()> {
        self.io.call("state_all", None).await
    }

    async fn state_one(&self, axis: u32) -> DriverResult<StateInfo> {
        self.io.call("state_one", Some(axis)).await?;
        let st = self.state.lock();
        if st.started.contains(&axis) && self.is_acquiring(&st) {
            Ok(StateInfo::new(ChannelState::Moving, "acquiring"))
        } else {
            Ok(StateInfo::new(ChannelState::On, "ready"))
        }
    }

    async fn pre_read_all(&self) -> DriverResult<()> {
        self.io.call("pre_read_all", None).await
    }

    async fn read_all(&self) -> DriverResult<()> {
        self.io.bulk_read().await
    }

    async fn read_one(&self, axis: u32) -> DriverResult<Payload> {
        self.io.call("read_one", Some(axis)).await?;
        let mut st = self.state.lock();
        if !st.synchronization.is_hardware() {
            let t = Self::elapsed(&st).min(self.integration_time(&st));
            return Ok(Payload::Scalar(self.sample(&st, axis, t)));
        }
        let completed = self.completed_repetitions(&st);
        let from = st.delivered.get(&axis).copied().unwrap_or(0);
        let integ = self.integration_time(&st);
        let values = (from..completed)
            .map(|_| self.sample(&st, axis, integ))
            .collect();
        st.delivered.insert(axis, completed.max(from));
        Ok(Payload::Chunk(values))
    }

    async fn stop_one(&self, axis: u32) -> DriverResult<()> {
        self.io.call("stop_one", Some(axis)).await?;
        self.halt();
        Ok(())
    }

    async fn stop_all(&self) -> DriverResult<()> {
        self.io.call("stop_all", None).await?;
        self.halt();
        Ok(())
    }

    async fn abort_one(&self, axis: u32) -> DriverResult<()> {
        self.io.call("abort_one", Some(axis)).await?;
        self.halt();
        Ok(())
    }

    async fn abort_all(&self) -> DriverResult<()> {
        self.io.call("abort_all", None).await?;
        self.halt();
        Ok(())
    }

    async fn set_ctrl_par(&self, name: &str, value: serde_json::Value) -> DriverResult<()> {
        self.io.call("set_ctrl_par", None).await?;
        let invalid = |what: &str| {
            DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::InvalidParameter,
                format!("invalid {} value: {}", what, value),
            )
        };
        let mut st = self.state.lock();
        match name {
            "repetitions" => {
                st.repetitions = value.as_u64().ok_or_else(|| invalid(name))?;
            }
            "latency_time" => {
                st.latency_time = value.as_f64().ok_or_else(|| invalid(name))?;
            }
            "synchronization" => {
                st.synchronization =
                    serde_json::from_value(value.clone()).map_err(|_| invalid(name))?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn get_ctrl_par(&self, name: &str) -> DriverResult<serde_json::Value> {
        let st = self.state.lock();
        match name {
            "repetitions" => Ok(serde_json::json!(st.repetitions)),
            "latency_time" => Ok(serde_json::json!(st.latency_time)),
            "synchronization" => Ok(serde_json::json!(st.synchronization.as_par())),
            _ => Err(DriverError::not_supported(
                DRIVER_TYPE,
                &format!("get_ctrl_par({})", name),
            )),
        }
    }
}

impl MockCounterTimer {
    fn halt(&self) {
        let mut st = self.state.lock();
        if st.started_at.is_some() && st.stopped_at.is_none() {
            st.stopped_at = Some(Instant::now());
        }
    }
}
