//! Simulated 0D controller (multimeter-like).
//!
//! 0D channels are passive: they are always ready and every read returns the
//! current sample. Axis `n` reads around `base_value * n`.

use crate::common::{CallLog, ErrorConfig, MockMode, MockRng, TimingConfig};
use crate::sim_io::SimIo;
use acq_core::driver::{ControllerCapabilities, ControllerDriver, ControllerFactory};
use acq_core::error::DriverResult;
use acq_core::state::{ChannelState, StateInfo};
use acq_core::value::Payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;

const DRIVER_TYPE: &str = "mock_zerod";

/// Configuration for MockZeroD driver
#[derive(Debug, Clone, Deserialize)]
pub struct MockZeroDConfig {
    /// Controller name
    #[serde(default)]
    pub name: Option<String>,
    /// Reading of axis 1 without noise (default: 1.0)
    #[serde(default = "default_base_value")]
    pub base_value: f64,
    /// Noise amplitude (default: 0.0)
    #[serde(default)]
    pub noise: f64,
    /// Timing and failure behaviour
    #[serde(default)]
    pub mode: MockMode,
    /// RNG seed for noise
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_base_value() -> f64 {
    1.0
}

/// Factory for creating MockZeroD instances.
pub struct MockZeroDFactory;

impl ControllerFactory for MockZeroDFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Mock 0D"
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: MockZeroDConfig = config.clone().try_into()?;
        anyhow::ensure!(cfg.noise >= 0.0, "noise must not be negative");
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn ControllerDriver>>> {
        Box::pin(async move {
            let cfg: MockZeroDConfig = config
                .try_into()
                .context("invalid mock_zerod configuration")?;
            let mut builder = MockZeroD::builder()
                .base_value(cfg.base_value)
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

/// Builder for [`MockZeroD`].
#[derive(Debug, Default)]
pub struct MockZeroDBuilder {
    name: Option<String>,
    base_value: Option<f64>,
    noise: f64,
    mode: MockMode,
    seed: Option<u64>,
    call_log: Option<CallLog>,
    errors: Option<ErrorConfig>,
}

impl MockZeroDBuilder {
    /// Controller name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reading without noise.
    pub fn base_value(mut self, value: f64) -> Self {
        self.base_value = Some(value);
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
    pub fn build(self) -> MockZeroD {
        MockZeroD {
            io: SimIo {
                name: self.name.unwrap_or_else(|| DRIVER_TYPE.to_string()),
                driver_type: DRIVER_TYPE,
                log: self.call_log.unwrap_or_default(),
                errors: SimIo::errors_for(self.mode, self.errors, self.seed),
                mode: self.mode,
                timing: TimingConfig::zero_d(),
            },
            rng: MockRng::new(self.seed),
            base_value: self.base_value.unwrap_or_else(default_base_value),
            noise: self.noise,
        }
    }
}

/// Simulated 0D controller.
pub struct MockZeroD {
    io: SimIo,
    rng: MockRng,
    base_value: f64,
    noise: f64,
}

impl MockZeroD {
    /// Start a builder.
    pub fn builder() -> MockZeroDBuilder {
        MockZeroDBuilder::default()
    }
}

#[async_trait]
impl ControllerDriver for MockZeroD {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    fn capabilities(&self) -> ControllerCapabilities {
        ControllerCapabilities::zero_d()
    }

    async fn state_one(&self, axis: u32) -> DriverResult<StateInfo> {
        self.io.call("state_one", Some(axis)).await?;
        Ok(StateInfo::new(ChannelState::On, "ready"))
    }

    async fn pre_read_all(&self) -> DriverResult<()> {
        self.io.call("pre_read_all", None).await
    }

    async fn read_all(&self) -> DriverResult<()> {
        self.io.bulk_read().await
    }

    async fn read_one(&self, axis: u32) -> DriverResult<Payload> {
        self.io.call("read_one", Some(axis)).await?;
        Ok(Payload::Scalar(
            self.base_value * axis as f64 + self.rng.noise(self.noise),
        ))
    }

    async fn stop_all(&self) -> DriverResult<()> {
        self.io.call("stop_all", None).await
    }

    async fn abort_all(&self) -> DriverResult<()> {
        self.io.call("abort_all", None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;
    use acq_core::error::DriverErrorKind;

    #[tokio::test]
    async fn test_reads_scale_with_axis() {
        let zerod = MockZeroD::builder().base_value(2.5).build();
        assert_eq!(zerod.read_one(2).await.unwrap(), Payload::Scalar(5.0));
        assert_eq!(zerod.state_one(2).await.unwrap().state, ChannelState::On);
    }

    #[tokio::test]
    async fn test_noise_is_bounded() {
        let zerod = MockZeroD::builder().noise(0.1).seed(3).build();
        for _ in 0..50 {
            let Payload::Scalar(v) = zerod.read_one(1).await.unwrap() else {
                panic!("expected scalar");
            };
            assert!((v - 1.0).abs() < 0.1);
        }
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let zerod = MockZeroD::builder()
            .errors(ErrorConfig::scenario(ErrorScenario::Timeout {
                operation: "read_one",
            }))
            .build();
        let err = zerod.read_one(1).await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }
}
