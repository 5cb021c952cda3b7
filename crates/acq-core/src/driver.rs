//! Controller driver interface and driver factories.
//!
//! A controller driver exposes the per-axis hardware operations the engine
//! sequences. Operations are grouped in "pre / do / post" triads that the
//! engine calls in a fixed order:
//!
//! ```text
//! load:  pre_load_all  -> pre_load_one(axis, v)  -> load_one(axis, v)  -> load_all
//! start: pre_start_all -> pre_start_one(axis, v) -> start_one(axis, v) -> start_all
//! state: pre_state_all -> pre_state_one(axis)    -> state_all          -> state_one(axis)
//! read:  pre_read_all  -> pre_read_one(axis)     -> read_all           -> read_one(axis)
//! ```
//!
//! Everything except `capabilities`, `state_one` and `read_one` has a no-op
//! default so simple drivers only implement what their hardware needs.
//!
//! # Capabilities
//!
//! [`ControllerCapabilities`] is queried once when a controller is registered
//! and cached by [`crate::controller::Controller`]. In particular the
//! `supports_listener_registration` flag is what classifies a trigger/gate
//! controller as a software (polled, edge-emitting) source rather than a
//! hardware one.
//!
//! # Example
//!
//! ```rust,ignore
//! use acq_core::driver::{ControllerCapabilities, ControllerDriver};
//!
//! struct Counter { /* ... */ }
//!
//! #[async_trait]
//! impl ControllerDriver for Counter {
//!     fn driver_type(&self) -> &str { "counter" }
//!     fn capabilities(&self) -> ControllerCapabilities {
//!         ControllerCapabilities::counter_timer()
//!     }
//!     async fn state_one(&self, axis: u32) -> DriverResult<StateInfo> { /* ... */ }
//!     async fn read_one(&self, axis: u32) -> DriverResult<Payload> { /* ... */ }
//! }
//! ```

use crate::channel::ChannelKind;
use crate::error::{DriverError, DriverResult};
use crate::state::StateInfo;
use crate::value::Payload;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capabilities
// =============================================================================

/// Static description of what a controller can do.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControllerCapabilities {
    /// Can be loaded with a master integration time / monitor count.
    pub timerable: bool,
    /// Channel kinds this controller provides.
    pub kinds: Vec<ChannelKind>,
    /// Emits trigger edges to registered listeners (software generator).
    pub supports_listener_registration: bool,
}

impl ControllerCapabilities {
    /// Counter/timer controller.
    pub fn counter_timer() -> Self {
        Self {
            timerable: true,
            kinds: vec![ChannelKind::CounterTimer],
            supports_listener_registration: false,
        }
    }

    /// Passive 0D controller.
    pub fn zero_d() -> Self {
        Self {
            timerable: false,
            kinds: vec![ChannelKind::ZeroD],
            supports_listener_registration: false,
        }
    }

    /// Trigger/gate generator; `software` generators accept edge listeners.
    pub fn trigger_gate(software: bool) -> Self {
        Self {
            timerable: false,
            kinds: vec![ChannelKind::TriggerGate],
            supports_listener_registration: software,
        }
    }

    /// Whether channels of `kind` can be created on the controller.
    pub fn provides(&self, kind: ChannelKind) -> bool {
        self.kinds.contains(&kind)
    }
}

// =============================================================================
// Synchronization
// =============================================================================

/// Timing of the edges a trigger/gate element generates.
///
/// All times are in seconds. One repetition is an active interval followed by
/// a passive interval; the offset is waited once before the first one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynchDescription {
    /// Delay before the first repetition (s)
    #[serde(default)]
    pub offset: f64,
    /// Active interval of each repetition (s)
    pub active: f64,
    /// Passive interval of each repetition (s)
    #[serde(default)]
    pub passive: f64,
    /// Number of repetitions
    pub repetitions: u64,
}

impl SynchDescription {
    /// Description of `repetitions` repetitions.
    pub fn new(offset: f64, active: f64, passive: f64, repetitions: u64) -> Self {
        Self {
            offset,
            active,
            passive,
            repetitions,
        }
    }

    /// Total duration of the generated sequence.
    pub fn total_time(&self) -> f64 {
        self.offset + self.repetitions as f64 * (self.active + self.passive)
    }
}

/// Which edge of a repetition was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Start of the active interval
    Active,
    /// Start of the passive interval
    Passive,
}

/// Edge emitted by a software trigger/gate generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEvent {
    /// Active or passive.
    pub kind: EdgeKind,
    /// Repetition index, starting at 0.
    pub index: u64,
}

impl EdgeEvent {
    /// Active edge of repetition `index`.
    pub fn active(index: u64) -> Self {
        Self {
            kind: EdgeKind::Active,
            index,
        }
    }

    /// Passive edge of repetition `index`.
    pub fn passive(index: u64) -> Self {
        Self {
            kind: EdgeKind::Passive,
            index,
        }
    }
}

/// Receiver of trigger edges.
///
/// Called from the generator's task; implementations must not block.
pub trait EdgeListener: Send + Sync {
    fn edge_received(&self, event: EdgeEvent);
}

// =============================================================================
// Driver Interface
// =============================================================================

/// Per-controller hardware operations sequenced by the acquisition engine.
///
/// # Contract
/// - `pre_load_one` / `pre_start_one` return `Ok(false)` when the axis is not
///   ready; the engine aborts the start sequence in that case.
/// - `state_one` reports `Moving` (or `Running`) while the axis acquires.
/// - `read_one` on a hardware-paced controller returns the samples acquired
///   since the previous read, possibly none.
/// - `stop_*` / `abort_*` must bring the axis to a non-busy state so polling
///   loops observe the end of the acquisition.
#[async_trait]
pub trait ControllerDriver: Send + Sync {
    /// Short driver identifier used in errors and logs.
    fn driver_type(&self) -> &str;

    /// Capabilities, queried once at controller registration.
    fn capabilities(&self) -> ControllerCapabilities;

    async fn pre_load_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn pre_load_one(&self, _axis: u32, _value: f64) -> DriverResult<bool> {
        Ok(true)
    }

    async fn load_one(&self, _axis: u32, _value: f64) -> DriverResult<()> {
        Ok(())
    }

    async fn load_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn pre_start_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn pre_start_one(&self, _axis: u32, _value: f64) -> DriverResult<bool> {
        Ok(true)
    }

    async fn start_one(&self, _axis: u32, _value: f64) -> DriverResult<()> {
        Ok(())
    }

    async fn start_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn pre_state_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn pre_state_one(&self, _axis: u32) -> DriverResult<()> {
        Ok(())
    }

    async fn state_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn state_one(&self, axis: u32) -> DriverResult<StateInfo>;

    async fn pre_read_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn pre_read_one(&self, _axis: u32) -> DriverResult<()> {
        Ok(())
    }

    async fn read_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn read_one(&self, axis: u32) -> DriverResult<Payload>;

    async fn stop_one(&self, _axis: u32) -> DriverResult<()> {
        Ok(())
    }

    async fn stop_all(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn abort_one(&self, _axis: u32) -> DriverResult<()> {
        Ok(())
    }

    async fn abort_all(&self) -> DriverResult<()> {
        Ok(())
    }

    /// Set a controller parameter (`"repetitions"`, `"synchronization"`, ...).
    ///
    /// Unknown parameters are ignored by default.
    async fn set_ctrl_par(&self, _name: &str, _value: serde_json::Value) -> DriverResult<()> {
        Ok(())
    }

    async fn get_ctrl_par(&self, name: &str) -> DriverResult<serde_json::Value> {
        Err(DriverError::not_supported(
            self.driver_type(),
            &format!("get_ctrl_par({})", name),
        ))
    }

    /// Program a trigger/gate axis with the edges it has to generate.
    async fn synch_one(&self, _axis: u32, _description: &SynchDescription) -> DriverResult<()> {
        Ok(())
    }

    /// Register an edge listener. Only meaningful when
    /// `capabilities().supports_listener_registration` is true.
    fn add_listener(&self, _listener: Arc<dyn EdgeListener>) -> DriverResult<()> {
        Err(DriverError::not_supported(self.driver_type(), "add_listener"))
    }

    /// Drop every registered edge listener.
    fn remove_listeners(&self) -> DriverResult<()> {
        Err(DriverError::not_supported(
            self.driver_type(),
            "remove_listeners",
        ))
    }
}

// =============================================================================
// Driver Factories
// =============================================================================

/// Builds controller drivers from TOML configuration.
///
/// Factories are registered explicitly at startup with a [`FactoryRegistry`]
/// and looked up by the `driver` field of a controller description:
///
/// ```toml
/// [[controllers]]
/// name = "ctctrl01"
/// driver = "sim_counter_timer"   # matches driver_type()
/// ```
pub trait ControllerFactory: Send + Sync + 'static {
    /// Driver type name used in the TOML `driver` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// Validate configuration without instantiating.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<Arc<dyn ControllerDriver>>>;
}

/// Anything driver factories can be registered with.
///
/// Lets driver crates provide a `register_all` helper without depending on
/// the engine crate.
pub trait FactoryRegistry {
    /// Register a driver factory.
    fn register_factory(&self, factory: Box<dyn ControllerFactory>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synch_total_time() {
        let synch = SynchDescription::new(0.5, 0.1, 0.05, 10);
        assert!((synch.total_time() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_capability_presets() {
        assert!(ControllerCapabilities::counter_timer().timerable);
        assert!(ControllerCapabilities::zero_d().provides(ChannelKind::ZeroD));
        assert!(ControllerCapabilities::trigger_gate(true).supports_listener_registration);
        assert!(!ControllerCapabilities::trigger_gate(false).supports_listener_registration);
    }

    #[test]
    fn test_synch_from_toml_defaults() {
        let synch: SynchDescription = toml::from_str("active = 0.2\nrepetitions = 3").unwrap();
        assert_eq!(synch.offset, 0.0);
        assert_eq!(synch.passive, 0.0);
        assert_eq!(synch.repetitions, 3);
    }
}
