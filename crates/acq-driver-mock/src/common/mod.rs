//! Common infrastructure for simulated controllers.
//!
//! - **mode**: Operational modes (Instant, Realistic, Chaos)
//! - **timing**: Hardware-like call latencies
//! - **errors**: Error injection framework
//! - **rng**: Seeded random number generator
//! - **call_log**: Shared record of driver calls

/// Call recording.
pub mod call_log;
/// Error injection.
pub mod errors;
/// Simulation modes.
pub mod mode;
/// Seeded randomness.
pub mod rng;
/// Call and readout delays.
pub mod timing;

pub use call_log::{Call, CallLog};
pub use errors::{ErrorConfig, ErrorScenario};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
