//! Simulated Controller Drivers for the acquisition engine
//!
//! This crate provides simulated controllers for testing and demos without
//! physical hardware. All simulated controllers are async-safe
//! (`tokio::time::sleep`, never `std::thread::sleep`).
//!
//! # Available Simulated Controllers
//!
//! - [`MockCounterTimer`] - timerable counter card, software or hardware paced
//! - [`MockZeroD`] - passive 0D controller with configurable noise
//! - [`MockTriggerGate`] - hardware trigger/gate generator
//!
//! Every controller can record its calls into a shared [`CallLog`] and inject
//! failures through an [`ErrorConfig`].
//!
//! # Driver Factory Pattern
//!
//! Each simulated controller provides a `ControllerFactory`:
//!
//! ```rust,ignore
//! use acq_driver_mock::register_all;
//! use acq_engine::registry::ControllerRegistry;
//!
//! let registry = ControllerRegistry::new();
//! register_all(&registry);
//! ```

/// Building blocks shared by the simulated controllers.
pub mod common;
mod mock_counter_timer;
mod mock_trigger_gate;
mod mock_zerod;
mod sim_io;

pub use common::{Call, CallLog, ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};

pub use mock_counter_timer::{
    MockCounterTimer, MockCounterTimerBuilder, MockCounterTimerConfig, MockCounterTimerFactory,
};
pub use mock_trigger_gate::{
    MockTriggerGate, MockTriggerGateBuilder, MockTriggerGateConfig, MockTriggerGateFactory,
};
pub use mock_zerod::{MockZeroD, MockZeroDBuilder, MockZeroDConfig, MockZeroDFactory};

use acq_core::driver::FactoryRegistry;

/// Register all simulated controller factories.
pub fn register_all(registry: &impl FactoryRegistry) {
    registry.register_factory(Box::new(MockCounterTimerFactory));
    registry.register_factory(Box::new(MockZeroDFactory));
    registry.register_factory(Box::new(MockTriggerGateFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::driver::ControllerFactory;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<&'static str>>);

    impl FactoryRegistry for Collect {
        fn register_factory(&self, factory: Box<dyn ControllerFactory>) {
            self.0.lock().push(factory.driver_type());
        }
    }

    #[test]
    fn test_register_all() {
        let registry = Collect::default();
        register_all(&registry);
        assert_eq!(
            *registry.0.lock(),
            vec!["mock_counter_timer", "mock_zerod", "mock_trigger_gate"]
        );
    }
}
