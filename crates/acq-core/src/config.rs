//! Acquisition configuration: the immutable per-run snapshot of which
//! channels of which controllers take part in an acquisition.
//!
//! ```text
//! AcquisitionConfig
//! ├── timer / monitor            (global master channel names)
//! └── controllers (ordered)
//!     └── ControllerConfig
//!         ├── channels (ordered) name -> ChannelConfig { enabled, index, trigger_element }
//!         ├── timer / monitor    (local master channel names)
//!         ├── trigger_type
//!         └── trigger_element
//! ```
//!
//! Iteration order is configuration order everywhere ([`IndexMap`]); the
//! engine's "first controller" and "master last" rules depend on it.

use crate::channel::{Channel, TriggerType};
use crate::controller::Controller;
use crate::error::{AcqError, AcqResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Which master channel paces an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterKey {
    /// Global integration timer
    Timer,
    /// Global monitor counter
    Monitor,
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterKey::Timer => f.write_str("timer"),
            MasterKey::Monitor => f.write_str("monitor"),
        }
    }
}

/// Per-channel metadata.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// The channel itself.
    pub channel: Arc<Channel>,
    /// Whether runs read it.
    pub enabled: bool,
    /// Position in the measurement group.
    pub index: usize,
    /// Trigger/gate element of the owning controller.
    pub trigger_element: Option<Arc<Channel>>,
}

/// Per-controller part of an acquisition configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Owning controller.
    pub controller: Arc<Controller>,
    /// Channels in configuration order, by name.
    pub channels: IndexMap<String, ChannelConfig>,
    /// Local timer channel.
    pub timer: Option<String>,
    /// Local monitor channel.
    pub monitor: Option<String>,
    /// How the controller is paced.
    pub trigger_type: TriggerType,
    /// Element pacing the controller, if any.
    pub trigger_element: Option<Arc<Channel>>,
}

impl ControllerConfig {
    /// Configuration of `controller` without channels.
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            channels: IndexMap::new(),
            timer: None,
            monitor: None,
            trigger_type: TriggerType::Software,
            trigger_element: None,
        }
    }

    /// Add an enabled channel; its index is its insertion position.
    pub fn with_channel(self, channel: Arc<Channel>) -> Self {
        self.with_channel_enabled(channel, true)
    }

    /// Add `channel`, enabled or not.
    pub fn with_channel_enabled(mut self, channel: Arc<Channel>, enabled: bool) -> Self {
        let index = self.channels.len();
        self.channels.insert(
            channel.name().to_string(),
            ChannelConfig {
                channel,
                enabled,
                index,
                trigger_element: self.trigger_element.clone(),
            },
        );
        self
    }

    /// Set the local timer.
    pub fn with_timer(mut self, name: impl Into<String>) -> Self {
        self.timer = Some(name.into());
        self
    }

    /// Set the local monitor.
    pub fn with_monitor(mut self, name: impl Into<String>) -> Self {
        self.monitor = Some(name.into());
        self
    }

    /// Set how the controller is clocked; the element also becomes every
    /// channel's trigger element.
    pub fn with_trigger(mut self, trigger_type: TriggerType, element: Option<Arc<Channel>>) -> Self {
        self.trigger_type = trigger_type;
        for cfg in self.channels.values_mut() {
            cfg.trigger_element = element.clone();
        }
        self.trigger_element = element;
        self
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        self.controller.name()
    }

    /// Local master channel name for `key`.
    pub fn master(&self, key: MasterKey) -> Option<&str> {
        match key {
            MasterKey::Timer => self.timer.as_deref(),
            MasterKey::Monitor => self.monitor.as_deref(),
        }
    }

    /// Enabled channels in order.
    pub fn enabled_channels(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.values().filter(|cfg| cfg.enabled)
    }

    fn validate(&self) -> AcqResult<()> {
        if self.channels.is_empty() {
            return Err(AcqError::Configuration(format!(
                "controller '{}' has no channels",
                self.name()
            )));
        }
        for (key, local) in [(MasterKey::Timer, &self.timer), (MasterKey::Monitor, &self.monitor)] {
            if let Some(name) = local {
                if !self.channels.contains_key(name) {
                    return Err(AcqError::Configuration(format!(
                        "local {} '{}' is not a channel of controller '{}'",
                        key,
                        name,
                        self.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Immutable per-run acquisition configuration.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionConfig {
    controllers: IndexMap<String, ControllerConfig>,
    timer: Option<String>,
    monitor: Option<String>,
}

impl AcquisitionConfig {
    /// Build and validate a configuration.
    ///
    /// # Errors
    /// `AcqError::Configuration` if a controller has no channels, a
    /// controller appears twice, or a timer/monitor name does not refer to a
    /// channel of the configuration.
    pub fn new(
        controllers: Vec<ControllerConfig>,
        timer: Option<String>,
        monitor: Option<String>,
    ) -> AcqResult<Self> {
        let mut map = IndexMap::with_capacity(controllers.len());
        for ctrl in controllers {
            ctrl.validate()?;
            let name = ctrl.name().to_string();
            if map.insert(name.clone(), ctrl).is_some() {
                return Err(AcqError::Configuration(format!(
                    "controller '{}' appears twice",
                    name
                )));
            }
        }
        let config = Self {
            controllers: map,
            timer,
            monitor,
        };
        for key in [MasterKey::Timer, MasterKey::Monitor] {
            if let Some(name) = config.master(key) {
                if config.controller_of(name).is_none() {
                    return Err(AcqError::Configuration(format!(
                        "global {} '{}' is not part of the configuration",
                        key, name
                    )));
                }
            }
        }
        Ok(config)
    }

    /// Configuration without any controller.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sub-configuration keeping the controllers accepted by `keep`, in
    /// order. A master name not owned by a kept controller is dropped.
    pub fn subset<F>(&self, keep: F, timer: Option<String>, monitor: Option<String>) -> Self
    where
        F: Fn(&ControllerConfig) -> bool,
    {
        let controllers: IndexMap<String, ControllerConfig> = self
            .controllers
            .iter()
            .filter(|(_, ctrl)| keep(ctrl))
            .map(|(name, ctrl)| (name.clone(), ctrl.clone()))
            .collect();
        let owned = |name: Option<String>| {
            name.filter(|n| controllers.values().any(|c| c.channels.contains_key(n)))
        };
        let timer = owned(timer);
        let monitor = owned(monitor);
        Self {
            controllers,
            timer,
            monitor,
        }
    }

    /// Global timer channel.
    pub fn timer(&self) -> Option<&str> {
        self.timer.as_deref()
    }

    /// Global monitor channel.
    pub fn monitor(&self) -> Option<&str> {
        self.monitor.as_deref()
    }

    /// Global timer or monitor.
    pub fn master(&self, key: MasterKey) -> Option<&str> {
        match key {
            MasterKey::Timer => self.timer(),
            MasterKey::Monitor => self.monitor(),
        }
    }

    /// Controllers in configuration order.
    pub fn controllers(&self) -> impl Iterator<Item = &ControllerConfig> {
        self.controllers.values()
    }

    /// Controller `name`.
    pub fn controller(&self, name: &str) -> Option<&ControllerConfig> {
        self.controllers.get(name)
    }

    /// Controller names in order.
    pub fn controller_names(&self) -> Vec<String> {
        self.controllers.keys().cloned().collect()
    }

    /// Controller configuration owning channel `name`.
    pub fn controller_of(&self, channel: &str) -> Option<&ControllerConfig> {
        self.controllers
            .values()
            .find(|ctrl| ctrl.channels.contains_key(channel))
    }

    /// Channel `name`, searched in every controller.
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.controllers
            .values()
            .find_map(|ctrl| ctrl.channels.get(name))
    }

    /// Every channel of the configuration, in configuration order.
    pub fn channels(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.controllers.values().flat_map(|ctrl| ctrl.channels.values())
    }

    /// Number of controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether it holds nothing.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
