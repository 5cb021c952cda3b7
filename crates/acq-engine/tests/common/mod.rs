//! Simulated benches shared by the integration tests.

#![allow(dead_code)]

use acq_core::channel::{Channel, ChannelKind};
use acq_core::controller::Controller;
use acq_core::driver::ControllerDriver;
use acq_driver_mock::{CallLog, ErrorConfig, MockCounterTimer, MockTriggerGate, MockZeroD};
use acq_engine::{AcquisitionRequest, EngineSettings};
use std::sync::Arc;
use std::time::Duration;

pub const COUNT_RATE: f64 = 100.0;

pub fn settings() -> EngineSettings {
    EngineSettings {
        acq_loop_sleep_time: 0.001,
        acq_loop_states_per_value: 1,
        zerod_sleep_time: 0.002,
        synch_sleep_time: 0.002,
        ..EngineSettings::default()
    }
}

pub fn fast(request: AcquisitionRequest) -> AcquisitionRequest {
    request.with_sleep(Duration::from_millis(1), 1)
}

fn controller(name: &str, driver: impl ControllerDriver + 'static) -> Arc<Controller> {
    Arc::new(Controller::new(name, Arc::new(driver)))
}

pub fn counter_timer(name: &str, log: &CallLog, errors: Option<ErrorConfig>) -> Arc<Controller> {
    let mut builder = MockCounterTimer::builder()
        .name(name)
        .count_rate(COUNT_RATE)
        .call_log(log.clone());
    if let Some(errors) = errors {
        builder = builder.errors(errors);
    }
    controller(name, builder.build())
}

pub fn zerod(name: &str, log: &CallLog, base_value: f64) -> Arc<Controller> {
    controller(
        name,
        MockZeroD::builder()
            .name(name)
            .base_value(base_value)
            .call_log(log.clone())
            .build(),
    )
}

pub fn hardware_trigger_gate(name: &str, log: &CallLog) -> Arc<Controller> {
    controller(
        name,
        MockTriggerGate::builder().name(name).call_log(log.clone()).build(),
    )
}

pub fn channel(controller: &Arc<Controller>, name: &str, axis: u32, kind: ChannelKind) -> Arc<Channel> {
    Arc::new(Channel::new(name, axis, kind, controller.clone()))
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {expected}, got {actual}"
    );
}
