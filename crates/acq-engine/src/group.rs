//! Measurement groups.
//!
//! A measurement group is the user-facing set of channels acquired together.
//! Its description ([`MeasurementGroupSpec`]) is plain TOML:
//!
//! ```toml
//! [measurement_group]
//! name = "mntgrp01"
//! timer = "ct01"
//!
//! [[measurement_group.controllers]]
//! name = "ctctrl01"
//! trigger_type = "hardware_trigger"
//! trigger_element = "tg01"
//! channels = [{ name = "ct01" }, { name = "ct02", enabled = false }]
//! ```
//!
//! Applying a description resolves the names against the [`Pool`], pushes
//! the trigger type to the controllers, routes the channels into the
//! orchestrator and builds the [`AcquisitionConfig`] used by every run.

use crate::context::AcquisitionRequest;
use crate::orchestrator::{Acquisition, RunHandle};
use crate::registry::Pool;
use acq_core::channel::{Channel, ChannelKind, TriggerType};
use acq_core::config::{AcquisitionConfig, ControllerConfig};
use acq_core::error::{AcqError, AcqResult};
use acq_core::state::ChannelState;
use acq_core::value::ValueReading;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

fn default_enabled() -> bool {
    true
}

/// Channel entry of a measurement group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupChannelSpec {
    /// Pool channel name.
    pub name: String,
    /// Whether the channel is acquired.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Controller entry of a measurement group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupControllerSpec {
    /// Pool controller name.
    pub name: String,
    /// Channels in order.
    pub channels: Vec<GroupChannelSpec>,
    /// Default: software
    #[serde(default)]
    pub trigger_type: TriggerType,
    /// Pool trigger/gate element pacing the controller.
    #[serde(default)]
    pub trigger_element: Option<String>,
    /// Local timer
    #[serde(default)]
    pub timer: Option<String>,
    /// Local monitor
    #[serde(default)]
    pub monitor: Option<String>,
}

/// Measurement group description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementGroupSpec {
    /// Group name.
    pub name: String,
    /// Defaults to the first channel of the first timerable controller.
    #[serde(default)]
    pub timer: Option<String>,
    /// Defaults to the timer.
    #[serde(default)]
    pub monitor: Option<String>,
    /// Controllers in order.
    pub controllers: Vec<GroupControllerSpec>,
}

/// Aggregate state of a group from its channels' kinds and states.
///
/// Precedence is Fault, Alarm, Moving, On. A moving 0D channel counts as On
/// since 0D channels keep reading until stopped. While a software
/// synchronization is dispatching runs the group is Moving even between
/// runs.
pub fn aggregate_state(states: &[(ChannelKind, ChannelState)], synch_in_progress: bool) -> ChannelState {
    let (mut fault, mut alarm, mut moving) = (false, false, false);
    for (kind, state) in states {
        let state = match (kind, state) {
            (ChannelKind::ZeroD, ChannelState::Moving) => ChannelState::On,
            (_, state) => *state,
        };
        match state {
            ChannelState::Fault => fault = true,
            ChannelState::Alarm => alarm = true,
            state if state.is_busy() => moving = true,
            _ => {}
        }
    }
    if fault {
        ChannelState::Fault
    } else if alarm {
        ChannelState::Alarm
    } else if moving || synch_in_progress {
        ChannelState::Moving
    } else {
        ChannelState::On
    }
}

/// A configured measurement group bound to an orchestrator.
pub struct MeasurementGroup {
    name: String,
    acquisition: Acquisition,
    spec: RwLock<MeasurementGroupSpec>,
    config: RwLock<Arc<AcquisitionConfig>>,
}

impl MeasurementGroup {
    /// Create the group and apply `spec`.
    pub async fn new(spec: MeasurementGroupSpec, pool: &Pool, acquisition: Acquisition) -> AcqResult<Self> {
        let group = Self {
            name: spec.name.clone(),
            acquisition,
            spec: RwLock::new(spec.clone()),
            config: RwLock::new(Arc::new(AcquisitionConfig::empty())),
        };
        group.set_configuration(spec, pool).await?;
        Ok(group)
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Orchestrator running the group's acquisitions.
    pub fn acquisition(&self) -> &Acquisition {
        &self.acquisition
    }

    /// Description currently applied.
    pub fn spec(&self) -> MeasurementGroupSpec {
        self.spec.read().clone()
    }

    /// Configuration used by the next run.
    pub fn config(&self) -> Arc<AcquisitionConfig> {
        self.config.read().clone()
    }

    /// Channels of the group (trigger elements excluded), in order.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.config().channels().map(|c| c.channel.clone()).collect()
    }

    /// Apply a new description.
    ///
    /// # Errors
    /// `AcqError::ActionBusy` while acquiring, `AcqError::UnknownElement`
    /// for names missing from the pool, `AcqError::Configuration` for
    /// inconsistent descriptions, `AcqError::Driver` if a controller refuses
    /// its trigger type.
    pub async fn set_configuration(&self, spec: MeasurementGroupSpec, pool: &Pool) -> AcqResult<()> {
        if self.acquisition.is_running() {
            return Err(AcqError::ActionBusy(self.name.clone()));
        }

        let mut resolved = Vec::with_capacity(spec.controllers.len());
        for ctrl_spec in &spec.controllers {
            let controller = pool.controller(&ctrl_spec.name)?;
            let mut channels = Vec::with_capacity(ctrl_spec.channels.len());
            for ch_spec in &ctrl_spec.channels {
                let channel = pool.channel(&ch_spec.name)?;
                if channel.controller().name() != controller.name() {
                    return Err(AcqError::Configuration(format!(
                        "channel '{}' does not belong to controller '{}'",
                        ch_spec.name, ctrl_spec.name
                    )));
                }
                channels.push((channel, ch_spec.enabled));
            }
            let trigger_element = match &ctrl_spec.trigger_element {
                Some(name) => {
                    let element = pool.channel(name)?;
                    if element.kind() != ChannelKind::TriggerGate {
                        return Err(AcqError::Configuration(format!(
                            "'{}' is not a trigger/gate element",
                            name
                        )));
                    }
                    Some(element)
                }
                None => None,
            };
            resolved.push((ctrl_spec, controller, channels, trigger_element));
        }

        let timer = spec.timer.clone().or_else(|| {
            resolved
                .iter()
                .filter(|(_, ctrl, _, _)| ctrl.is_timerable())
                .find_map(|(_, _, channels, _)| {
                    channels
                        .iter()
                        .find(|(c, _)| c.kind() == ChannelKind::CounterTimer)
                        .map(|(c, _)| c.name().to_string())
                })
        });
        let monitor = spec.monitor.clone().or_else(|| timer.clone());

        let mut configs = Vec::with_capacity(resolved.len());
        for (ctrl_spec, controller, channels, trigger_element) in &resolved {
            let owns = |name: &Option<String>| {
                name.as_ref()
                    .filter(|n| channels.iter().any(|(c, _)| c.name() == n.as_str()))
                    .cloned()
            };
            let first = channels.first().map(|(c, _)| c.name().to_string());

            let mut cfg = ControllerConfig::new(controller.clone());
            for (channel, enabled) in channels {
                cfg = cfg.with_channel_enabled(channel.clone(), *enabled);
            }
            if controller.is_timerable() {
                let local_timer = ctrl_spec.timer.clone().or_else(|| owns(&timer)).or_else(|| first.clone());
                let local_monitor = ctrl_spec.monitor.clone().or_else(|| owns(&monitor)).or_else(|| first.clone());
                if let Some(t) = local_timer {
                    cfg = cfg.with_timer(t);
                }
                if let Some(m) = local_monitor {
                    cfg = cfg.with_monitor(m);
                }
            }
            configs.push(cfg.with_trigger(ctrl_spec.trigger_type, trigger_element.clone()));
        }
        let config = AcquisitionConfig::new(configs, timer, monitor)?;

        // Nothing is touched before the description is known to be valid.
        for (ctrl_spec, controller, channels, _) in &resolved {
            for (channel, enabled) in channels {
                channel.set_enabled(*enabled);
                channel.set_trigger_type(ctrl_spec.trigger_type);
            }
            if controller.is_timerable() {
                controller
                    .driver()
                    .set_ctrl_par("synchronization", json!(ctrl_spec.trigger_type.as_par()))
                    .await?;
            }
        }

        let previous = self.config();
        let stale = previous
            .channels()
            .map(|c| c.channel.clone())
            .chain(previous.controllers().filter_map(|c| c.trigger_element.clone()));
        for channel in stale {
            match self.acquisition.remove_element(channel.name()) {
                // shared trigger elements are removed once
                Ok(()) | Err(AcqError::UnknownElement(_)) => {}
                Err(err) => return Err(err),
            }
        }
        for (_, _, channels, trigger_element) in &resolved {
            for (channel, _) in channels {
                self.acquisition.add_element(channel.clone())?;
            }
            if let Some(element) = trigger_element {
                self.acquisition.add_element(element.clone())?;
            }
        }

        info!(
            group = %self.name,
            controllers = config.len(),
            timer = ?config.timer(),
            "Measurement group configured"
        );
        *self.config.write() = Arc::new(config);
        *self.spec.write() = spec;
        Ok(())
    }

    /// Request timed by the group's timer.
    pub fn integ_time_request(&self, integ_time: f64) -> AcquisitionRequest {
        AcquisitionRequest::integ_time(self.config(), integ_time)
    }

    /// Request gated by the group's monitor.
    pub fn monitor_count_request(&self, count: u64) -> AcquisitionRequest {
        AcquisitionRequest::monitor_count(self.config(), count)
    }

    /// Start `request` on the group's orchestrator.
    pub async fn start(&self, request: AcquisitionRequest) -> AcqResult<RunHandle> {
        debug!(group = %self.name, "Starting");
        self.acquisition.run(request).await
    }

    /// Run a single-shot acquisition to completion and return the last
    /// committed value of every enabled channel.
    pub async fn count(&self, integ_time: f64) -> AcqResult<IndexMap<String, ValueReading>> {
        self.start(self.integ_time_request(integ_time)).await?.wait().await?;
        Ok(self
            .config()
            .channels()
            .filter(|c| c.enabled)
            .filter_map(|c| c.channel.value().map(|v| (c.channel.name().to_string(), v)))
            .collect())
    }

    /// Stop the running acquisition.
    pub async fn stop(&self) -> AcqResult<()> {
        self.acquisition.stop().await
    }

    /// Abort the running acquisition.
    pub async fn abort(&self) -> AcqResult<()> {
        self.acquisition.abort().await
    }

    /// Read every channel without committing.
    pub async fn read_value(&self, serial: bool) -> IndexMap<String, ValueReading> {
        self.acquisition.read_value(serial).await
    }

    /// Aggregate state of the enabled channels.
    pub fn state(&self) -> ChannelState {
        let states: Vec<(ChannelKind, ChannelState)> = self
            .config()
            .channels()
            .filter(|c| c.enabled)
            .map(|c| (c.channel.kind(), c.channel.state()))
            .collect();
        aggregate_state(&states, self.acquisition.is_software_synch_in_progress())
    }
}

impl std::fmt::Debug for MeasurementGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementGroup")
            .field("name", &self.name)
            .field("controllers", &self.config().controller_names())
            .finish()
    }
}
