//! Single-shot and multiple acquisitions against simulated controllers.

mod common;

use acq_core::channel::{Channel, ChannelKind};
use acq_core::config::{AcquisitionConfig, ControllerConfig, MasterKey};
use acq_core::controller::Controller;
use acq_core::error::AcqError;
use acq_core::event::ChannelEventKind;
use acq_core::state::ChannelState;
use acq_driver_mock::{CallLog, ErrorConfig, ErrorScenario};
use acq_engine::{Acquisition, AcquisitionRequest};
use common::*;
use std::sync::Arc;

/// Two counter/timer cards; the global timer `ct01` sits on the first one.
struct Bench {
    log: CallLog,
    controllers: Vec<Arc<Controller>>,
    channels: Vec<Arc<Channel>>,
    config: Arc<AcquisitionConfig>,
}

impl Bench {
    fn new() -> Self {
        Self::with_errors(None, false)
    }

    fn with_errors(second: Option<ErrorConfig>, with_zerod: bool) -> Self {
        let log = CallLog::new();
        let ctrl1 = counter_timer("ctctrl01", &log, None);
        let ctrl2 = counter_timer("ctctrl02", &log, second);
        let ct01 = channel(&ctrl1, "ct01", 1, ChannelKind::CounterTimer);
        let ct02 = channel(&ctrl1, "ct02", 2, ChannelKind::CounterTimer);
        let ct03 = channel(&ctrl2, "ct03", 1, ChannelKind::CounterTimer);
        let ct04 = channel(&ctrl2, "ct04", 2, ChannelKind::CounterTimer);

        let mut controllers = vec![ctrl1.clone(), ctrl2.clone()];
        let mut channels = vec![ct01.clone(), ct02.clone(), ct03.clone(), ct04.clone()];
        let mut configs = vec![
            ControllerConfig::new(ctrl1)
                .with_channel(ct01)
                .with_channel(ct02)
                .with_timer("ct01"),
            ControllerConfig::new(ctrl2)
                .with_channel(ct03)
                .with_channel(ct04)
                .with_timer("ct03"),
        ];
        if with_zerod {
            let ctrl = zerod("zerodctrl01", &log, 5.0);
            let zerod01 = channel(&ctrl, "zerod01", 1, ChannelKind::ZeroD);
            configs.push(ControllerConfig::new(ctrl.clone()).with_channel(zerod01.clone()));
            controllers.push(ctrl);
            channels.push(zerod01);
        }
        let config = AcquisitionConfig::new(configs, Some("ct01".into()), None).unwrap();
        Self {
            log,
            controllers,
            channels,
            config: Arc::new(config),
        }
    }

    fn channel(&self, name: &str) -> &Arc<Channel> {
        self.channels.iter().find(|c| c.name() == name).unwrap()
    }

    /// Nothing running, no channel operated, no controller claimed.
    fn assert_released(&self, acquisition: &Acquisition) {
        assert!(!acquisition.is_running());
        for channel in &self.channels {
            assert!(channel.operation().is_none(), "{} still operated", channel.name());
        }
        for controller in &self.controllers {
            assert!(controller.operator().is_none(), "{} still claimed", controller.name());
        }
    }

    /// Released, with every channel back to On after a completed run.
    fn assert_idle(&self, acquisition: &Acquisition) {
        self.assert_released(acquisition);
        for channel in &self.channels {
            assert_eq!(channel.state(), ChannelState::On, "{}", channel.name());
        }
    }
}

#[tokio::test]
async fn single_shot_counts_on_every_controller() {
    let bench = Bench::new();
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.05));
    acquisition.run(request).await.unwrap().wait().await.unwrap();

    let value = |name: &str| bench.channel(name).value().unwrap().value_or_nan();
    assert_close(value("ct01"), 0.05);
    assert_close(value("ct02"), COUNT_RATE * 2.0 * 0.05);
    assert_close(value("ct03"), 0.05);
    assert_close(value("ct04"), COUNT_RATE * 2.0 * 0.05);
    bench.assert_idle(&acquisition);
}

#[tokio::test]
async fn master_controller_and_channel_start_last() {
    let bench = Bench::new();
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.02));
    acquisition.run(request).await.unwrap().wait().await.unwrap();

    let log = &bench.log;
    assert_eq!(log.controllers_for("start_all"), vec!["ctctrl02", "ctctrl01"]);
    assert_eq!(log.count("ctctrl01", "load_one"), 1);
    assert_eq!(log.count("ctctrl02", "load_one"), 1);

    let position = |ctrl: &str, op: &str, axis: Option<u32>| log.last_position(ctrl, op, axis).unwrap();
    assert!(position("ctctrl01", "start_one", Some(2)) < position("ctctrl01", "start_one", Some(1)));
    assert!(position("ctctrl01", "load_one", Some(1)) < position("ctctrl01", "pre_start_all", None));
    assert!(position("ctctrl02", "load_one", Some(1)) < position("ctctrl02", "start_one", Some(2)));
}

#[tokio::test]
async fn final_value_is_published_before_final_state() {
    let bench = Bench::new();
    let acquisition = Acquisition::new("acq", settings()).unwrap();
    let mut events = bench.channel("ct02").subscribe();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.02));
    acquisition.run(request).await.unwrap().wait().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(received.len() >= 3);
    assert!(received.windows(2).all(|w| w[0].seq < w[1].seq));

    let last = &received[received.len() - 1];
    let before = &received[received.len() - 2];
    assert!(last.priority && before.priority);
    assert!(matches!(&last.kind, ChannelEventKind::State(info) if info.state == ChannelState::On));
    assert!(matches!(&before.kind, ChannelEventKind::Value(v) if !v.reading.is_error()));
    assert!(matches!(&received[0].kind, ChannelEventKind::State(info) if info.state == ChannelState::Moving));
}

#[tokio::test]
async fn invalid_requests_never_touch_hardware() {
    let bench = Bench::new();
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let err = acquisition
        .run(AcquisitionRequest::monitor_count(bench.config.clone(), 100))
        .await
        .unwrap_err();
    assert!(matches!(err, AcqError::MissingMaster(MasterKey::Monitor)));

    let err = acquisition
        .run(AcquisitionRequest::integ_time(bench.config.clone(), -1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, AcqError::Configuration(_)));

    let mut both = AcquisitionRequest::integ_time(bench.config.clone(), 0.1);
    both.monitor_count = Some(10);
    assert!(matches!(
        acquisition.run(both).await.unwrap_err(),
        AcqError::Configuration(_)
    ));

    assert!(bench.log.calls().is_empty());
    bench.assert_released(&acquisition);
}

#[tokio::test]
async fn not_ready_controller_rejects_start() {
    let errors = ErrorConfig::scenario(ErrorScenario::NotReady {
        operation: "pre_start_one",
    });
    let bench = Bench::with_errors(Some(errors), false);
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let err = acquisition
        .run(fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.02)))
        .await
        .unwrap_err();
    match err {
        AcqError::DriverRejected {
            controller,
            operation,
            ..
        } => {
            assert_eq!(controller, "ctctrl02");
            assert_eq!(operation, "PreStartOne");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(bench.log.count("ctctrl01", "start_all"), 0);
    bench.assert_released(&acquisition);
}

#[tokio::test]
async fn failed_read_faults_only_its_controller() {
    let errors = ErrorConfig::scenario(ErrorScenario::Timeout {
        operation: "read_one",
    });
    let bench = Bench::with_errors(Some(errors), false);
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.02));
    acquisition.run(request).await.unwrap().wait().await.unwrap();

    assert!(bench.channel("ct03").value().unwrap().is_error());
    assert!(bench.channel("ct04").value().unwrap().is_error());
    assert_close(bench.channel("ct01").value().unwrap().value_or_nan(), 0.02);
    assert!(!acquisition.is_running());
}

#[tokio::test]
async fn zerod_channels_accumulate_during_the_run() {
    let bench = Bench::with_errors(None, true);
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.05));
    acquisition.run(request).await.unwrap().wait().await.unwrap();

    let zerod01 = bench.channel("zerod01");
    assert_close(zerod01.value().unwrap().value_or_nan(), 5.0);
    assert!(bench.log.count("zerodctrl01", "read_one") >= 2);
    bench.assert_idle(&acquisition);
}

#[tokio::test]
async fn zerod_run_completes_with_a_single_worker() {
    let bench = Bench::with_errors(None, true);
    let settings = acq_engine::EngineSettings {
        max_workers: 1,
        ..settings()
    };
    let acquisition = Acquisition::new("acq", settings).unwrap();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.05));
    let handle = acquisition.run(request).await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(3), handle.wait())
        .await
        .expect("counter/timer loop starved by the 0D loop")
        .unwrap();

    assert_close(bench.channel("ct01").value().unwrap().value_or_nan(), 0.05);
    assert_close(bench.channel("zerod01").value().unwrap().value_or_nan(), 5.0);
    bench.assert_idle(&acquisition);
}

#[tokio::test]
async fn lost_controller_faults_only_its_channels() {
    let errors = ErrorConfig::scenario(ErrorScenario::CommunicationLoss {
        from: "pre_state_all",
    });
    let bench = Bench::with_errors(Some(errors), false);
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.05));
    acquisition.run(request).await.unwrap().wait().await.unwrap();

    for name in ["ct03", "ct04"] {
        let channel = bench.channel(name);
        assert_eq!(channel.state(), ChannelState::Fault, "{}", name);
        assert!(channel.value().unwrap().is_error(), "{}", name);
        assert!(channel.operation().is_none());
    }
    assert_close(bench.channel("ct01").value().unwrap().value_or_nan(), 0.05);
    assert_eq!(bench.channel("ct02").state(), ChannelState::On);
    bench.assert_released(&acquisition);
}

#[tokio::test]
async fn second_run_is_rejected_while_busy() {
    let bench = Bench::new();
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let handle = acquisition
        .run(fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.2)))
        .await
        .unwrap();
    let err = acquisition
        .run(fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.2)))
        .await
        .unwrap_err();
    assert!(matches!(err, AcqError::ActionBusy(_)));

    acquisition.stop().await.unwrap();
    handle.wait().await.unwrap();
    bench.assert_idle(&acquisition);
}

#[tokio::test]
async fn multiple_runs_sequentially() {
    let bench = Bench::new();
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let request = fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.01)).multiple(3);
    let handle = acquisition.run(request).await.unwrap();
    assert!(acquisition.is_running());
    handle.wait().await.unwrap();

    assert_eq!(bench.log.count("ctctrl01", "start_all"), 3);
    assert_eq!(bench.log.count("ctctrl02", "start_all"), 3);
    bench.assert_idle(&acquisition);
}

#[tokio::test]
async fn runs_are_numbered() {
    let bench = Bench::new();
    let acquisition = Acquisition::new("acq", settings()).unwrap();

    let first = acquisition
        .run(fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.01)))
        .await
        .unwrap();
    let first_seq = first.context().sequence;
    let first_id = first.run_id();
    first.wait().await.unwrap();

    let second = acquisition
        .run(fast(AcquisitionRequest::integ_time(bench.config.clone(), 0.01)))
        .await
        .unwrap();
    assert_eq!(second.context().sequence, first_seq + 1);
    assert_ne!(second.run_id(), first_id);
    second.wait().await.unwrap();
}
