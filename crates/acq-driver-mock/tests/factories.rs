//! Building simulated controllers through their factories.

use acq_core::driver::ControllerFactory;
use acq_core::state::ChannelState;
use acq_core::value::Payload;
use acq_driver_mock::{MockCounterTimerFactory, MockTriggerGateFactory, MockZeroDFactory};

fn table(src: &str) -> toml::Value {
    toml::from_str(src).unwrap()
}

#[tokio::test]
async fn counter_timer_from_toml() {
    let driver = MockCounterTimerFactory
        .build(table("name = \"ctctrl01\"\ncount_rate = 16.0\nseed = 1"))
        .await
        .unwrap();
    assert_eq!(driver.driver_type(), "mock_counter_timer");
    assert!(driver.capabilities().timerable);

    driver.load_one(1, 0.0625).await.unwrap();
    driver.pre_start_all().await.unwrap();
    driver.start_one(2, 0.0625).await.unwrap();
    driver.start_one(1, 0.0625).await.unwrap();
    driver.start_all().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(90)).await;

    assert_eq!(driver.state_one(2).await.unwrap().state, ChannelState::On);
    assert_eq!(driver.read_one(2).await.unwrap(), Payload::Scalar(2.0));
}

#[tokio::test]
async fn zerod_and_trigger_gate_defaults() {
    let zerod = MockZeroDFactory.build(table("")).await.unwrap();
    assert_eq!(zerod.read_one(1).await.unwrap(), Payload::Scalar(1.0));

    let tg = MockTriggerGateFactory.build(table("mode = \"instant\"")).await.unwrap();
    assert!(!tg.capabilities().supports_listener_registration);
}

#[tokio::test]
async fn bad_config_is_rejected() {
    let err = MockCounterTimerFactory
        .build(table("count_rate = \"fast\""))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("mock_counter_timer"));
    assert!(MockZeroDFactory.validate(&table("noise = -1.0")).is_err());
}
