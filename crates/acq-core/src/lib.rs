//! `acq-core`
//!
//! Core types and traits shared by the synchronized acquisition engine and
//! the controller drivers it sequences.
//!
//! ## Building Blocks
//!
//! - **Driver interface** ([`driver::ControllerDriver`]): per-axis
//!   pre/do/post triads (load, start, state, read), stop/abort, controller
//!   parameters and optional edge-listener registration.
//! - **Controllers** ([`controller::Controller`]): one driver shared by many
//!   channels, with capabilities queried once and an operator claim.
//! - **Channels** ([`channel::Channel`]): last state, last value and an
//!   append-only indexed value buffer, published to subscribers in commit
//!   order.
//! - **Acquisition configuration** ([`config::AcquisitionConfig`]): the
//!   immutable per-run snapshot of participating controllers and channels.
//!
//! ## Key Types
//!
//! - [`StateInfo`]: state plus status, optionally carrying a driver error
//! - [`ValueReading`]: value plus timestamp, or the error that replaced it
//! - [`AcqError`]: engine error type
//! - [`DriverError`]: `Clone`able driver failure

/// 0D accumulation.
pub mod accumulation;
/// Channels and trigger types.
pub mod channel;
/// Acquisition configurations.
pub mod config;
/// Controllers and operator claims.
pub mod controller;
/// Controller driver interface.
pub mod driver;
/// Error types.
pub mod error;
/// Channel events.
pub mod event;
/// Channel states.
pub mod state;
/// Values and value buffers.
pub mod value;

pub use accumulation::{Accumulation, AccumulationKind};
pub use channel::{Channel, ChannelKind, TriggerType};
pub use config::{AcquisitionConfig, ChannelConfig, ControllerConfig, MasterKey};
pub use controller::{Controller, OperatorId};
pub use driver::{
    ControllerCapabilities, ControllerDriver, ControllerFactory, EdgeEvent, EdgeKind,
    EdgeListener, FactoryRegistry, SynchDescription,
};
pub use error::{AcqError, AcqResult, DriverError, DriverErrorKind, DriverResult};
pub use event::{ChannelEvent, ChannelEventKind, ValueEvent};
pub use state::{ChannelState, Propagate, StateInfo};
pub use value::{IndexedValue, Payload, ValueBuffer, ValueReading};
