//! Measurement groups built from a TOML pool of simulated controllers.

use acq_core::error::AcqError;
use acq_core::state::ChannelState;
use acq_engine::{Acquisition, ControllerRegistry, MeasurementGroup, MeasurementGroupSpec, Pool, PoolSpec};
use std::time::Duration;

const POOL: &str = r#"
[[controllers]]
name = "ctctrl01"
driver = "mock_counter_timer"
count_rate = 100.0
channels = [
    { name = "ct01", axis = 1 },
    { name = "ct02", axis = 2 },
    { name = "ct03", axis = 3 },
]

[[controllers]]
name = "zerodctrl01"
driver = "mock_zerod"
base_value = 2.0
channels = [{ name = "zerod01", axis = 1 }]

[[controllers]]
name = "tgctrl01"
driver = "mock_trigger_gate"
channels = [{ name = "tg01", axis = 1 }]

[[controllers]]
name = "swtgctrl01"
driver = "software_trigger_gate"
channels = [{ name = "swtg01", axis = 1 }]
"#;

const GROUP: &str = r#"
name = "mntgrp01"

[[controllers]]
name = "ctctrl01"
channels = [{ name = "ct01" }, { name = "ct02" }, { name = "ct03", enabled = false }]

[[controllers]]
name = "zerodctrl01"
channels = [{ name = "zerod01" }]
"#;

async fn pool() -> Pool {
    let registry = ControllerRegistry::new();
    acq_driver_mock::register_all(&registry);
    registry
        .instantiate(&PoolSpec::from_toml(POOL).unwrap())
        .await
        .unwrap()
}

fn spec(src: &str) -> MeasurementGroupSpec {
    toml::from_str(src).unwrap()
}

async fn group(pool: &Pool) -> MeasurementGroup {
    let settings = acq_engine::EngineSettings {
        acq_loop_sleep_time: 0.001,
        zerod_sleep_time: 0.002,
        ..Default::default()
    };
    let acquisition = Acquisition::new("acq", settings).unwrap();
    MeasurementGroup::new(spec(GROUP), pool, acquisition).await.unwrap()
}

#[tokio::test]
async fn count_reports_enabled_channels() {
    let pool = pool().await;
    let group = group(&pool).await;
    assert_eq!(group.config().timer(), Some("ct01"));

    let values = group.count(0.02).await.unwrap();
    let names: Vec<&str> = values.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["ct01", "ct02", "zerod01"]);
    assert!((values["ct01"].value_or_nan() - 0.02).abs() < 1e-6);
    assert!((values["ct02"].value_or_nan() - 4.0).abs() < 1e-6);
    assert!((values["zerod01"].value_or_nan() - 2.0).abs() < 1e-6);

    assert!(pool.channel("ct03").unwrap().value().is_none());
    assert_eq!(group.state(), ChannelState::On);
}

#[tokio::test]
async fn state_follows_the_run() {
    let pool = pool().await;
    let group = group(&pool).await;

    let handle = group.start(group.integ_time_request(0.1)).await.unwrap();
    assert_eq!(group.state(), ChannelState::Moving);
    assert!(matches!(
        group.set_configuration(spec(GROUP), &pool).await,
        Err(AcqError::ActionBusy(_))
    ));

    group.stop().await.unwrap();
    handle.wait().await.unwrap();
    assert_eq!(group.state(), ChannelState::On);
}

#[tokio::test]
async fn reconfiguration_swaps_elements() {
    let pool = pool().await;
    let group = group(&pool).await;
    let names = |group: &MeasurementGroup| -> Vec<String> {
        group
            .acquisition()
            .elements()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    };
    assert!(names(&group).contains(&"zerod01".to_string()));

    group
        .set_configuration(
            spec(
                r#"
                name = "mntgrp01"
                timer = "ct02"

                [[controllers]]
                name = "ctctrl01"
                trigger_type = "hardware_trigger"
                trigger_element = "tg01"
                channels = [{ name = "ct01" }, { name = "ct02" }]
                "#,
            ),
            &pool,
        )
        .await
        .unwrap();
    let after = names(&group);
    assert!(after.contains(&"tg01".to_string()));
    assert!(!after.contains(&"zerod01".to_string()));
    assert_eq!(group.config().timer(), Some("ct02"));
    assert_eq!(
        pool.channel("ct01").unwrap().trigger_type(),
        acq_core::channel::TriggerType::HardwareTrigger
    );

    group
        .set_configuration(
            spec(
                r#"
                name = "mntgrp01"

                [[controllers]]
                name = "ctctrl01"
                trigger_element = "swtg01"
                channels = [{ name = "ct01" }]
                "#,
            ),
            &pool,
        )
        .await
        .unwrap();
    let after = names(&group);
    assert!(after.contains(&"swtg01".to_string()));
    assert!(!after.contains(&"tg01".to_string()));
    assert!(!after.contains(&"ct02".to_string()));
}

#[tokio::test]
async fn software_synchronized_group_stays_moving_between_runs() {
    let pool = pool().await;
    let acquisition = Acquisition::new("acq", Default::default()).unwrap();
    let group = MeasurementGroup::new(
        spec(
            r#"
            name = "mntgrp02"

            [[controllers]]
            name = "ctctrl01"
            trigger_element = "swtg01"
            channels = [{ name = "ct01" }]
            "#,
        ),
        &pool,
        acquisition,
    )
    .await
    .unwrap();

    let request = group
        .integ_time_request(0.002)
        .synchronized(3)
        .with_synchronization(acq_core::driver::SynchDescription::new(0.0, 0.005, 0.05, 3))
        .with_sleep(Duration::from_millis(1), 1);
    let handle = group.start(request).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(group.state(), ChannelState::Moving);
    handle.wait().await.unwrap();
    assert_eq!(group.state(), ChannelState::On);
}

#[tokio::test]
async fn bad_descriptions_are_rejected() {
    let pool = pool().await;
    let acquisition = Acquisition::new("acq", Default::default()).unwrap();

    let unknown = spec(
        r#"
        name = "g"
        [[controllers]]
        name = "ctctrl01"
        channels = [{ name = "ct99" }]
        "#,
    );
    assert!(matches!(
        MeasurementGroup::new(unknown, &pool, acquisition.clone()).await,
        Err(AcqError::UnknownElement(name)) if name == "ct99"
    ));

    let foreign = spec(
        r#"
        name = "g"
        [[controllers]]
        name = "ctctrl01"
        channels = [{ name = "zerod01" }]
        "#,
    );
    assert!(matches!(
        MeasurementGroup::new(foreign, &pool, acquisition.clone()).await,
        Err(AcqError::Configuration(_))
    ));

    let not_a_trigger = spec(
        r#"
        name = "g"
        [[controllers]]
        name = "ctctrl01"
        trigger_element = "ct02"
        channels = [{ name = "ct01" }]
        "#,
    );
    assert!(matches!(
        MeasurementGroup::new(not_a_trigger, &pool, acquisition).await,
        Err(AcqError::Configuration(_))
    ));
}

#[tokio::test]
async fn rejected_reconfiguration_leaves_channels_untouched() {
    let pool = pool().await;
    let group = group(&pool).await;
    let ct01 = pool.channel("ct01").unwrap();
    let ct03 = pool.channel("ct03").unwrap();
    assert!(!ct03.is_enabled());

    let err = group
        .set_configuration(
            spec(
                r#"
                name = "mntgrp01"
                timer = "ct99"

                [[controllers]]
                name = "ctctrl01"
                trigger_type = "hardware_trigger"
                trigger_element = "tg01"
                channels = [{ name = "ct01" }, { name = "ct03" }]
                "#,
            ),
            &pool,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AcqError::Configuration(_)));

    assert_eq!(ct01.trigger_type(), acq_core::channel::TriggerType::Software);
    assert!(!ct03.is_enabled());
    assert_eq!(group.config().timer(), Some("ct01"));
    assert!(!group
        .acquisition()
        .elements()
        .iter()
        .any(|c| c.name() == "tg01"));

    let values = group.count(0.01).await.unwrap();
    assert!(values.contains_key("zerod01"));
}
