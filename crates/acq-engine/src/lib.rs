//! `acq-engine`
//!
//! Sequences synchronized acquisitions across counter/timer, 0D and
//! trigger/gate controllers.
//!
//! ## Layers
//!
//! - **Actions** ([`action`]): the counter/timer run in its three flavors
//!   (single shot, continuous hardware, continuous software), the 0D run and
//!   trigger/gate generation. Each runs its start phase on the caller's task
//!   and its polling loop on the [`WorkerPool`].
//! - **Orchestrator** ([`Acquisition`]): picks the actions for a request,
//!   partitions the configuration into hardware and software halves and
//!   relays software trigger edges.
//! - **Measurement groups** ([`MeasurementGroup`]): named, reconfigurable
//!   channel sets with an aggregated state, built on a [`Pool`] created by
//!   the [`ControllerRegistry`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use acq_engine::{Acquisition, AcquisitionRequest, ControllerRegistry, EngineSettings, PoolSpec};
//!
//! let registry = ControllerRegistry::new();
//! acq_driver_mock::register_all(&registry);
//! let pool = registry.instantiate(&PoolSpec::from_toml(&text)?).await?;
//!
//! let acquisition = Acquisition::new("acq", EngineSettings::default())?;
//! let handle = acquisition.run(AcquisitionRequest::integ_time(config, 0.1)).await?;
//! handle.wait().await?;
//! ```

/// Acquisition actions.
pub mod action;
/// Requests and per-run context.
pub mod context;
/// Measurement groups.
pub mod group;
/// Orchestrator.
pub mod orchestrator;
/// Hardware/software split of configurations.
pub mod partition;
/// Controller factories and pools.
pub mod registry;
/// Engine settings.
pub mod settings;
/// Software trigger/gate generator.
pub mod software_synch;
/// Bounded worker pool.
pub mod worker;

#[cfg(test)]
mod testing;

pub use action::counter_timer::{AcquisitionRun, Pacing, RunFlavor, ValuePolicy};
pub use action::synch::TriggerGateGeneration;
pub use action::zerod::ZeroDAcquisition;
pub use action::{ActionCore, ActionPhase, ActiveGuard, SlaveAction};
pub use context::{AcquisitionParams, AcquisitionRequest, MasterValue, RunContext};
pub use group::{
    aggregate_state, GroupChannelSpec, GroupControllerSpec, MeasurementGroup, MeasurementGroupSpec,
};
pub use orchestrator::{Acquisition, AcquisitionStats, RunHandle};
pub use partition::{split_configurations, trigger_gate_configuration, SplitConfiguration};
pub use registry::{ChannelSpec, ControllerRegistry, ControllerSpec, Pool, PoolSpec};
pub use settings::EngineSettings;
pub use software_synch::{SoftwareTriggerGate, SoftwareTriggerGateFactory};
pub use worker::{TaskHandle, WorkerPool};
