//! Counter/timer acquisition.
//!
//! One action type covers the three ways counter/timer channels are
//! acquired. What differs between them is captured by a [`RunFlavor`]:
//!
//! | flavor                | values committed                 | pacing          | repetitions pushed |
//! |-----------------------|----------------------------------|-----------------|--------------------|
//! | `SINGLE_SHOT`         | every read                       | periodic reads  | no                 |
//! | `CONTINUOUS_HARDWARE` | non-empty reads only             | periodic reads  | yes                |
//! | `CONTINUOUS_SOFTWARE` | final read, tagged with edge idx | one run per edge| no                 |
//!
//! # Start sequence
//!
//! ```text
//! mark channels ─▶ [SetCtrlPar synchronization/repetitions/latency_time]
//!               ─▶ PreLoadAll / PreLoadOne / LoadOne / LoadAll   (timerable, master ctrl last)
//!               ─▶ PreStartAll                                   (every controller)
//!               ─▶ PreStartOne / StartOne                        (local master channel last)
//!               ─▶ channels Moving (priority)
//!               ─▶ StartAll                                      (master ctrl last)
//! ```
//!
//! The controller owning the global timer (or monitor) is started last so
//! that every slave is already counting when the master gate opens.

use super::readout::{any_busy, raw_read_state_info, raw_read_values, ControllerChannels};
use super::{clear_operations, mark_operations, ActionCore, ActionPhase, ActiveGuard, SlaveAction};
use crate::context::AcquisitionParams;
use crate::worker::{TaskHandle, WorkerPool};
use acq_core::channel::{Channel, ChannelKind, TriggerType};
use acq_core::config::{AcquisitionConfig, ControllerConfig};
use acq_core::error::{AcqError, AcqResult};
use acq_core::state::{ChannelState, Propagate};
use acq_core::value::{IndexedValue, Payload, ValueReading};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// How read values are committed to channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuePolicy {
    /// Commit every reading.
    Forward,
    /// Commit only readings carrying data or an error.
    ForwardNonEmpty,
    /// Commit only the final reading, as a single sample at the edge index.
    IndexedAppend,
}

/// What drives value reads while the acquisition runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// The action reads values itself: once at start, then every
    /// `nb_states_per_value` state polls.
    SelfDriven,
    /// The action is started once per trigger edge and only reads at the end.
    PerEdge,
}

/// Behaviour that distinguishes the counter/timer acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunFlavor {
    /// How read values are committed
    pub value_policy: ValuePolicy,
    /// What ends an acquisition
    pub pacing: Pacing,
    /// Push trigger type, repetitions and latency time to the controllers
    /// before loading.
    pub program_repetitions: bool,
}

impl RunFlavor {
    /// Timer/monitor run, values committed as they are read.
    pub const SINGLE_SHOT: Self = Self {
        value_policy: ValuePolicy::Forward,
        pacing: Pacing::SelfDriven,
        program_repetitions: false,
    };

    /// Hardware-paced repetitions, values appended per index.
    pub const CONTINUOUS_HARDWARE: Self = Self {
        value_policy: ValuePolicy::ForwardNonEmpty,
        pacing: Pacing::SelfDriven,
        program_repetitions: true,
    };

    /// One run per software edge, tagged with the edge index.
    pub const CONTINUOUS_SOFTWARE: Self = Self {
        value_policy: ValuePolicy::IndexedAppend,
        pacing: Pacing::PerEdge,
        program_repetitions: false,
    };
}

/// A participating controller with its channels ordered for starting.
struct Participant<'a> {
    config: &'a ControllerConfig,
    channels: Vec<Arc<Channel>>,
    /// Axis loaded with the master value; `None` for non-timerable controllers.
    load_axis: Option<u32>,
}

/// Counter/timer acquisition action.
pub struct AcquisitionRun {
    core: Arc<ActionCore>,
    flavor: RunFlavor,
    active: Mutex<Vec<ControllerChannels>>,
    slaves: RwLock<Vec<Arc<dyn SlaveAction>>>,
}

impl AcquisitionRun {
    /// Idle action with `flavor`.
    pub fn new(name: impl Into<String>, flavor: RunFlavor) -> Arc<Self> {
        Arc::new(Self {
            core: ActionCore::new(name),
            flavor,
            active: Mutex::new(Vec::new()),
            slaves: RwLock::new(Vec::new()),
        })
    }

    /// Name.
    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// How the action commits values and ends.
    pub fn flavor(&self) -> RunFlavor {
        self.flavor
    }

    /// Shared busy flag and element list.
    pub fn core(&self) -> &Arc<ActionCore> {
        &self.core
    }

    /// Whether the action is busy.
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// Current phase.
    pub fn phase(&self) -> ActionPhase {
        self.core.phase()
    }

    /// Track a channel.
    pub fn add_element(&self, channel: Arc<Channel>) {
        self.core.add_element(channel);
    }

    /// Returns whether the channel was known.
    pub fn remove_element(&self, name: &str) -> bool {
        self.core.remove_element(name)
    }

    /// Tracked channels.
    pub fn elements(&self) -> Vec<Arc<Channel>> {
        self.core.elements()
    }

    /// Register an action to stop when this one finishes.
    pub fn add_slave(&self, slave: Arc<dyn SlaveAction>) {
        self.slaves.write().push(slave);
    }

    /// Claim the action.
    ///
    /// # Errors
    /// `AcqError::ActionBusy` if it is already running.
    pub fn begin(&self) -> AcqResult<ActiveGuard> {
        self.core.try_begin()
    }

    fn participants<'a>(
        &self,
        config: &'a AcquisitionConfig,
        params: &AcquisitionParams,
    ) -> AcqResult<Vec<Participant<'a>>> {
        let key = params.master.key();
        let master = config.master(key).ok_or(AcqError::MissingMaster(key))?;
        let master_ctrl = config
            .controller_of(master)
            .ok_or(AcqError::MissingMaster(key))?;
        if !master_ctrl.controller.is_timerable() {
            return Err(AcqError::MasterNotTimerable(master_ctrl.name().to_string()));
        }
        if !master_ctrl.channels.get(master).map_or(false, |c| c.enabled) {
            return Err(AcqError::Configuration(format!(
                "{} channel '{}' is disabled",
                key, master
            )));
        }

        let mut participants = Vec::new();
        for ctrl in config.controllers() {
            let mut channels: Vec<Arc<Channel>> = ctrl
                .enabled_channels()
                .filter(|c| c.channel.kind() == ChannelKind::CounterTimer)
                .map(|c| c.channel.clone())
                .collect();
            if channels.is_empty() {
                continue;
            }

            let is_master_ctrl = ctrl.name() == master_ctrl.name();
            let local = if is_master_ctrl {
                Some(master)
            } else {
                ctrl.master(key)
                    .filter(|name| channels.iter().any(|c| c.name() == *name))
                    .or_else(|| {
                        channels
                            .iter()
                            .find(|c| c.name() == master)
                            .map(|c| c.name())
                    })
                    .or_else(|| channels.first().map(|c| c.name()))
            }
            .map(str::to_string);

            // local master channel is started last
            if let Some(local) = &local {
                if let Some(pos) = channels.iter().position(|c| c.name() == local.as_str()) {
                    let ch = channels.remove(pos);
                    channels.push(ch);
                }
            }
            let load_axis = if ctrl.controller.is_timerable() {
                channels.last().map(|c| c.axis())
            } else {
                None
            };
            participants.push(Participant {
                config: ctrl,
                channels,
                load_axis,
            });
        }

        // master controller last
        if let Some(pos) = participants
            .iter()
            .position(|p| p.config.name() == master_ctrl.name())
        {
            let p = participants.remove(pos);
            participants.push(p);
        }
        Ok(participants)
    }

    /// Prepare and start the controllers of `config`.
    ///
    /// Channels are marked as operated by this action before any driver
    /// call. On error the markers are cleared; controllers already started
    /// are not rolled back, the caller is expected to stop or abort.
    ///
    /// # Errors
    /// - `AcqError::MissingMaster` / `MasterNotTimerable` / `Configuration`
    ///   for configurations that cannot be paced
    /// - `AcqError::ChannelBusy` if a channel is operated by another action
    /// - `AcqError::DriverRejected` if a controller answers a pre-load or
    ///   pre-start with "not ready"
    /// - `AcqError::Driver` for any other driver failure
    pub async fn start_action(
        &self,
        config: &AcquisitionConfig,
        params: &AcquisitionParams,
    ) -> AcqResult<()> {
        if self.flavor.value_policy == ValuePolicy::IndexedAppend && params.idx.is_none() {
            return Err(AcqError::Configuration(format!(
                "'{}' needs the trigger edge index",
                self.name()
            )));
        }
        let participants = self.participants(config, params)?;
        let channels: Vec<Arc<Channel>> = participants
            .iter()
            .flat_map(|p| p.channels.iter().cloned())
            .collect();

        mark_operations(&channels, self.name())?;
        *self.active.lock() = participants
            .iter()
            .map(|p| ControllerChannels {
                controller: p.config.controller.clone(),
                channels: p.channels.clone(),
            })
            .collect();

        if let Err(err) = self.start_controllers(&participants, params).await {
            warn!(action = %self.name(), error = %err, "Start failed");
            self.active.lock().clear();
            clear_operations(&channels);
            return Err(err);
        }
        self.core.set_phase(ActionPhase::Acquiring);
        info!(
            action = %self.name(),
            controllers = participants.len(),
            channels = channels.len(),
            "Acquisition started"
        );
        Ok(())
    }

    async fn start_controllers(
        &self,
        participants: &[Participant<'_>],
        params: &AcquisitionParams,
    ) -> AcqResult<()> {
        let value = params.master.driver_value();

        if self.flavor.program_repetitions {
            for p in participants {
                let driver = p.config.controller.driver();
                let trigger_type = match p.config.trigger_type {
                    TriggerType::Unknown => TriggerType::HardwareTrigger,
                    other => other,
                };
                debug!(controller = %p.config.name(), repetitions = params.repetitions, "Programming repetitions");
                driver
                    .set_ctrl_par("synchronization", json!(trigger_type.as_par()))
                    .await?;
                driver
                    .set_ctrl_par("repetitions", json!(params.repetitions))
                    .await?;
                driver
                    .set_ctrl_par("latency_time", json!(params.latency_time))
                    .await?;
            }
        }

        for p in participants {
            let Some(axis) = p.load_axis else { continue };
            let driver = p.config.controller.driver();
            debug!(controller = %p.config.name(), axis, value, "Loading");
            driver.pre_load_all().await?;
            if !driver.pre_load_one(axis, value).await? {
                return Err(AcqError::DriverRejected {
                    controller: p.config.name().to_string(),
                    operation: "PreLoadOne",
                    axis,
                });
            }
            driver.load_one(axis, value).await?;
            driver.load_all().await?;
        }

        for p in participants {
            p.config.controller.driver().pre_start_all().await?;
        }

        for p in participants {
            let driver = p.config.controller.driver();
            for channel in &p.channels {
                let axis = channel.axis();
                if !driver.pre_start_one(axis, value).await? {
                    return Err(AcqError::DriverRejected {
                        controller: p.config.name().to_string(),
                        operation: "PreStartOne",
                        axis,
                    });
                }
                driver.start_one(axis, value).await?;
            }
        }

        for p in participants {
            for channel in &p.channels {
                channel.set_state(ChannelState::Moving, Propagate::Priority);
            }
        }

        for p in participants {
            debug!(controller = %p.config.name(), "StartAll");
            p.config.controller.driver().start_all().await?;
        }
        Ok(())
    }

    fn commit_value(
        &self,
        channel: &Channel,
        reading: ValueReading,
        propagate: Propagate,
        params: &AcquisitionParams,
    ) {
        let reading = match self.flavor.value_policy {
            ValuePolicy::Forward => reading,
            ValuePolicy::ForwardNonEmpty if reading.is_empty() => return,
            ValuePolicy::ForwardNonEmpty => reading,
            ValuePolicy::IndexedAppend if reading.is_error() => reading,
            ValuePolicy::IndexedAppend => {
                let Some(idx) = params.idx else { return };
                let value = reading.value_or_nan();
                ValueReading {
                    payload: Payload::Indexed(vec![IndexedValue::new(idx, value)]),
                    ..reading
                }
            }
        };
        if let Err(err) = channel.put_value(reading, propagate) {
            warn!(channel = %channel.name(), error = %err, "Value not committed");
        }
    }

    fn commit_values(
        &self,
        values: Vec<(Arc<Channel>, ValueReading)>,
        propagate: Propagate,
        params: &AcquisitionParams,
    ) {
        for (channel, reading) in values {
            self.commit_value(&channel, reading, propagate, params);
        }
    }

    /// Poll until no channel is busy, then commit final states and values.
    ///
    /// Errors reading states or values never end the loop early; they are
    /// committed as fault states and failed values.
    pub async fn action_loop(&self, params: &AcquisitionParams) -> AcqResult<()> {
        let groups = self.active.lock().clone();
        let self_driven = self.flavor.pacing == Pacing::SelfDriven;
        let nb_states = u64::from(params.nb_states_per_value.max(1));

        if self_driven {
            let values = raw_read_values(&groups, false).await;
            self.commit_values(values, Propagate::Changed, params);
        }

        let mut iteration: u64 = 0;
        loop {
            let states = raw_read_state_info(&groups).await;
            if !any_busy(&states) {
                break;
            }
            if self_driven && (iteration + 1) % nb_states == 0 {
                let values = raw_read_values(&groups, false).await;
                self.commit_values(values, Propagate::Changed, params);
            }
            iteration += 1;
            tokio::time::sleep(params.acq_sleep).await;
        }

        self.core.set_phase(ActionPhase::Finishing);
        self.stop_slaves().await;

        let states = raw_read_state_info(&groups).await;
        let mut values = raw_read_values(&groups, false).await;
        for (channel, state) in states {
            channel.set_state_info(state, Propagate::None);
            if let Some(pos) = values.iter().position(|(c, _)| Arc::ptr_eq(c, &channel)) {
                let (_, reading) = values.swap_remove(pos);
                self.commit_value(&channel, reading, Propagate::Priority, params);
            }
            channel.clear_operation();
            channel.set_state_info(channel.translated_state_info(), Propagate::Priority);
        }

        self.active.lock().clear();
        debug!(action = %self.name(), polls = iteration, "Acquisition finished");
        Ok(())
    }

    async fn stop_slaves(&self) {
        let slaves = self.slaves.read().clone();
        for slave in slaves {
            if !slave.is_running() {
                continue;
            }
            if let Err(err) = slave.stop_action().await {
                warn!(action = %self.name(), slave = %slave.name(), error = %err, "Unable to stop slave action");
            }
        }
    }

    /// Start and poll to completion on the current task.
    pub async fn execute(
        self: Arc<Self>,
        guard: ActiveGuard,
        config: Arc<AcquisitionConfig>,
        params: AcquisitionParams,
    ) -> AcqResult<()> {
        self.start_action(&config, &params).await?;
        let result = self.action_loop(&params).await;
        drop(guard);
        result
    }

    /// Start on the current task, then poll on a pool worker.
    ///
    /// `on_finish` runs on the worker after the action returned to idle, and
    /// not at all if starting fails.
    pub async fn run<F>(
        self: &Arc<Self>,
        pool: &WorkerPool,
        guard: ActiveGuard,
        config: &AcquisitionConfig,
        params: AcquisitionParams,
        on_finish: F,
    ) -> AcqResult<TaskHandle<AcqResult<()>>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.start_action(config, &params).await?;
        let action = self.clone();
        let task = async move {
            let result = action.action_loop(&params).await;
            drop(guard);
            on_finish();
            result
        };
        Ok(pool.spawn(self.name(), task.in_current_span()))
    }

    /// Stop every started channel and controller.
    ///
    /// Every call is attempted; the first failure is returned.
    pub async fn stop_action(&self) -> AcqResult<()> {
        self.halt(false).await
    }

    /// Abort every started channel and controller.
    pub async fn abort_action(&self) -> AcqResult<()> {
        self.halt(true).await
    }

    async fn halt(&self, abort: bool) -> AcqResult<()> {
        let groups = self.active.lock().clone();
        let operation = if abort { "abort" } else { "stop" };
        let mut first_error = None;
        for group in &groups {
            let driver = group.controller.driver();
            for channel in &group.channels {
                let result = if abort {
                    driver.abort_one(channel.axis()).await
                } else {
                    driver.stop_one(channel.axis()).await
                };
                if let Err(err) = result {
                    warn!(channel = %channel.name(), operation, error = %err, "Halt failed");
                    first_error.get_or_insert(err);
                }
            }
            let result = if abort {
                driver.abort_all().await
            } else {
                driver.stop_all().await
            };
            if let Err(err) = result {
                warn!(controller = %group.name(), operation, error = %err, "Halt failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SlaveAction for AcquisitionRun {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn is_running(&self) -> bool {
        self.core.is_running()
    }

    async fn stop_action(&self) -> AcqResult<()> {
        self.halt(false).await
    }
}

impl std::fmt::Debug for AcquisitionRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionRun")
            .field("core", &self.core)
            .field("flavor", &self.flavor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AcquisitionRequest;
    use crate::settings::EngineSettings;
    use crate::testing::ct_controller;

    fn params(request: &AcquisitionRequest) -> AcquisitionParams {
        AcquisitionParams::from_request(request, &EngineSettings::default()).unwrap()
    }

    fn config(timer: Option<&str>) -> Arc<AcquisitionConfig> {
        Arc::new(
            AcquisitionConfig::new(
                vec![ct_controller("a", &["a1", "a2"]), ct_controller("b", &["b1"])],
                timer.map(String::from),
                None,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_missing_master_touches_nothing() {
        let run = AcquisitionRun::new("ct", RunFlavor::SINGLE_SHOT);
        let cfg = config(None);
        let err = run
            .start_action(&cfg, &params(&AcquisitionRequest::integ_time(cfg.clone(), 0.1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AcqError::MissingMaster(_)));
        assert!(cfg.channels().all(|c| c.channel.operation().is_none()));
    }

    #[tokio::test]
    async fn test_per_edge_run_needs_index() {
        let run = AcquisitionRun::new("sw", RunFlavor::CONTINUOUS_SOFTWARE);
        let cfg = config(Some("b1"));
        let request = AcquisitionRequest::integ_time(cfg.clone(), 0.1);
        let err = run.start_action(&cfg, &params(&request)).await.unwrap_err();
        assert!(matches!(err, AcqError::Configuration(msg) if msg.contains("edge index")));
    }

    #[tokio::test]
    async fn test_master_controller_ordered_last() {
        let run = AcquisitionRun::new("ct", RunFlavor::SINGLE_SHOT);
        let cfg = config(Some("a1"));
        let p = params(&AcquisitionRequest::integ_time(cfg.clone(), 0.1));
        let participants = run.participants(&cfg, &p).unwrap();
        let names: Vec<&str> = participants.iter().map(|p| p.config.name()).collect();
        assert_eq!(names, vec!["b", "a"]);
        let order: Vec<&str> = participants[1].channels.iter().map(|c| c.name()).collect();
        assert_eq!(order, vec!["a2", "a1"]);
        assert_eq!(participants[1].load_axis, Some(1));
    }

    #[tokio::test]
    async fn test_busy_channel_rejected() {
        let run = AcquisitionRun::new("ct", RunFlavor::SINGLE_SHOT);
        let cfg = config(Some("a1"));
        cfg.channel("b1").unwrap().channel.set_operation("other").unwrap();
        let err = run
            .start_action(&cfg, &params(&AcquisitionRequest::integ_time(cfg.clone(), 0.1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AcqError::ChannelBusy { .. }));
        assert!(cfg.channel("a1").unwrap().channel.operation().is_none());
    }

    #[tokio::test]
    async fn test_idle_drivers_finish_immediately() {
        let run = AcquisitionRun::new("ct", RunFlavor::SINGLE_SHOT);
        let cfg = config(Some("a1"));
        let guard = run.begin().unwrap();
        run.clone()
            .execute(
                guard,
                cfg.clone(),
                params(&AcquisitionRequest::integ_time(cfg.clone(), 0.1)),
            )
            .await
            .unwrap();
        assert!(!run.is_running());
        for ch in cfg.channels() {
            assert!(ch.channel.operation().is_none());
            assert_eq!(ch.channel.state(), ChannelState::On);
        }
    }
}
