//! Error types for the acquisition engine.
//!
//! Two layers of errors exist:
//!
//! - **[`DriverError`]**: raised by a controller driver. It is `Clone` because a
//!   single failing controller call has to be attached to every channel the
//!   call covered (see [`crate::state::StateInfo::fault`] and
//!   [`crate::value::ValueReading::failed`]).
//! - **[`AcqError`]**: everything the engine itself reports to its callers,
//!   from configuration mistakes caught before any hardware call to drivers
//!   refusing to start.
//!
//! Errors raised while polling state or values are never propagated through
//! the poll loop. They are folded into per-channel carriers so one misbehaving
//! controller cannot stop its siblings from being read.

use crate::config::MasterKey;
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Invalid controller or axis configuration
    Configuration,
    /// Link to the hardware failed
    Communication,
    /// The hardware reported a fault
    Hardware,
    /// No answer in time
    Timeout,
    /// Operation not implemented by the driver
    NotSupported,
    /// Parameter value rejected
    InvalidParameter,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::NotSupported => "not_supported",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a controller driver.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that failed.
    pub driver_type: String,
    /// Category.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl DriverError {
    /// Error of `kind` raised by `driver_type`.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an operation the driver does not implement.
    pub fn not_supported(driver_type: impl Into<String>, operation: &str) -> Self {
        Self::new(
            driver_type,
            DriverErrorKind::NotSupported,
            format!("operation '{}' is not supported", operation),
        )
    }
}

/// Result type returned by driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Convenience alias for results using the engine error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;

// =============================================================================
// Engine Errors
// =============================================================================

/// Primary error type of the acquisition engine.
///
/// # Error Categories
///
/// 1. **Configuration errors** - `Configuration`, `MissingMaster`,
///    `MasterNotTimerable`, `UnknownElement`
///    - Raised synchronously before any hardware call is issued
///    - Recovery: fix the request or the measurement group configuration
///
/// 2. **Driver rejection** - `DriverRejected`, `Driver`
///    - Raised while starting an action
///    - No compensating rollback of already started controllers is done;
///      the caller is expected to stop or abort
///
/// 3. **Contention** - `ActionBusy`, `ControllerBusy`, `ChannelBusy`
///    - Another acquisition already owns the resource
///    - Recovery: wait for `is_running()` to turn false
///
/// 4. **Runtime** - `OutOfOrder`, `Worker`
///    - Reported by value commits and the worker pool
#[derive(Error, Debug)]
pub enum AcqError {
    /// The request or configuration is semantically invalid.
    ///
    /// Typical causes: both or neither of integration time and monitor count
    /// given, a controller without channels, an empty repetition count.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The configuration has no global timer (or monitor) although the
    /// request is paced by one.
    #[error("Configuration has no {0} channel")]
    MissingMaster(MasterKey),

    /// The controller holding the global timer/monitor cannot be loaded with
    /// a master value.
    #[error("Master controller '{0}' is not timerable")]
    MasterNotTimerable(String),

    /// A controller answered a `PreLoadOne`/`PreStartOne` call with "not ready".
    #[error("{controller}.{operation}({axis}) returned false")]
    DriverRejected {
        controller: String,
        operation: &'static str,
        axis: u32,
    },

    /// A driver call raised an error during a start sequence.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The action is already in flight.
    #[error("Action '{0}' is already running")]
    ActionBusy(String),

    /// Another operator currently owns the controller.
    #[error("Controller '{controller}' is already operated by {operator}")]
    ControllerBusy { controller: String, operator: String },

    /// The channel is already involved in another operation.
    #[error("Channel '{channel}' is already involved in operation '{operation}'")]
    ChannelBusy { channel: String, operation: String },

    /// A value carried an index not strictly greater than the last buffered one.
    #[error("Channel '{channel}' received index {index} after index {last}")]
    OutOfOrder { channel: String, index: u64, last: u64 },

    /// A name does not resolve to a registered element.
    #[error("Unknown element '{0}'")]
    UnknownElement(String),

    /// A worker task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Worker(String),
}
