//! Controller registry and element pool.
//!
//! Driver crates register a [`ControllerFactory`] per driver type; a
//! [`PoolSpec`] read from TOML is then instantiated into a [`Pool`] of named
//! controllers and channels:
//!
//! ```toml
//! [[controllers]]
//! name = "ctctrl01"
//! driver = "mock_counter_timer"
//! count_rate = 1000.0            # forwarded to the factory
//! channels = [
//!     { name = "ct01", axis = 1 },
//!     { name = "ct02", axis = 2 },
//! ]
//! ```
//!
//! Every key besides `name`, `driver` and `channels` is handed to the
//! factory untouched, with `name` added so drivers can label their logs.

use crate::software_synch::SoftwareTriggerGateFactory;
use acq_core::channel::{Channel, ChannelKind};
use acq_core::controller::Controller;
use acq_core::driver::{ControllerFactory, FactoryRegistry};
use acq_core::error::{AcqError, AcqResult};
use anyhow::{anyhow, bail, Context, Result};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Descriptions
// =============================================================================

/// One channel of a controller description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Unique channel name.
    pub name: String,
    /// Axis on the controller.
    pub axis: u32,
    /// Defaults to the first kind the controller provides.
    #[serde(default)]
    pub kind: Option<ChannelKind>,
}

/// One controller of a pool description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSpec {
    /// Unique controller name.
    pub name: String,
    /// Driver type, matched against [`ControllerFactory::driver_type`].
    pub driver: String,
    /// Channels in order.
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
    /// Driver-specific settings.
    #[serde(flatten)]
    pub settings: toml::Table,
}

/// Controllers and channels to instantiate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    /// Controllers in order.
    #[serde(default)]
    pub controllers: Vec<ControllerSpec>,
}

impl PoolSpec {
    /// Parse a pool description from TOML text.
    pub fn from_toml(src: &str) -> Result<Self> {
        toml::from_str(src).context("invalid pool description")
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Named controllers and channels, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct Pool {
    controllers: IndexMap<String, Arc<Controller>>,
    channels: IndexMap<String, Arc<Channel>>,
}

impl Pool {
    /// Empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// `AcqError::Configuration` if the name is taken.
    pub fn add_controller(&mut self, controller: Arc<Controller>) -> AcqResult<()> {
        if self.controllers.contains_key(controller.name()) {
            return Err(AcqError::Configuration(format!(
                "controller '{}' is already in the pool",
                controller.name()
            )));
        }
        self.controllers.insert(controller.name().to_string(), controller);
        Ok(())
    }

    /// # Errors
    /// `AcqError::Configuration` if the name is taken or the channel's
    /// controller is not in the pool.
    pub fn add_channel(&mut self, channel: Arc<Channel>) -> AcqResult<()> {
        if self.channels.contains_key(channel.name()) {
            return Err(AcqError::Configuration(format!(
                "channel '{}' is already in the pool",
                channel.name()
            )));
        }
        if !self.controllers.contains_key(channel.controller().name()) {
            return Err(AcqError::Configuration(format!(
                "controller '{}' of channel '{}' is not in the pool",
                channel.controller().name(),
                channel.name()
            )));
        }
        self.channels.insert(channel.name().to_string(), channel);
        Ok(())
    }

    /// Controller `name`, or `UnknownElement`.
    pub fn controller(&self, name: &str) -> AcqResult<Arc<Controller>> {
        self.controllers
            .get(name)
            .cloned()
            .ok_or_else(|| AcqError::UnknownElement(name.to_string()))
    }

    /// Channel `name`, or `UnknownElement`.
    pub fn channel(&self, name: &str) -> AcqResult<Arc<Channel>> {
        self.channels
            .get(name)
            .cloned()
            .ok_or_else(|| AcqError::UnknownElement(name.to_string()))
    }

    /// Controllers in order.
    pub fn controllers(&self) -> impl Iterator<Item = &Arc<Controller>> {
        self.controllers.values()
    }

    /// Channels in order.
    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.values()
    }

    /// Channels of `controller`, in declaration order.
    pub fn channels_of<'a>(&'a self, controller: &'a str) -> impl Iterator<Item = &'a Arc<Channel>> + 'a {
        self.channels
            .values()
            .filter(move |c| c.controller().name() == controller)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Registered controller driver factories, keyed by driver type.
///
/// The software trigger/gate factory is always present.
pub struct ControllerRegistry {
    factories: DashMap<String, Box<dyn ControllerFactory>>,
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerRegistry {
    /// Registry with the built-in software trigger/gate factory.
    pub fn new() -> Self {
        let registry = Self {
            factories: DashMap::new(),
        };
        registry.register_factory(Box::new(SoftwareTriggerGateFactory));
        registry
    }

    /// Remove the factory for `driver_type`.
    pub fn unregister_factory(&self, driver_type: &str) -> Option<Box<dyn ControllerFactory>> {
        self.factories
            .remove(driver_type)
            .map(|(_, factory)| factory)
    }

    /// Whether `driver_type` is registered.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.factories.contains_key(driver_type)
    }

    /// Registered driver types, sorted.
    pub fn list_factories(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    /// Build the controller described by `spec`.
    ///
    /// Channels are not created; see [`ControllerRegistry::instantiate`].
    pub async fn build_controller(&self, spec: &ControllerSpec) -> Result<Arc<Controller>> {
        let mut settings = spec.settings.clone();
        if !settings.contains_key("name") {
            settings.insert("name".to_string(), toml::Value::String(spec.name.clone()));
        }
        let config = toml::Value::Table(settings);

        let build = {
            let factory = self.factories.get(&spec.driver).ok_or_else(|| {
                anyhow!(
                    "no factory registered for driver '{}' of controller '{}'; available: {:?}",
                    spec.driver,
                    spec.name,
                    self.list_factories()
                )
            })?;
            factory.validate(&config).with_context(|| {
                format!(
                    "configuration validation failed for controller '{}' ({})",
                    spec.name, spec.driver
                )
            })?;
            tracing::info!(
                controller = %spec.name,
                driver_type = %spec.driver,
                "Building controller from factory"
            );
            factory.build(config)
        };

        let driver = build
            .await
            .with_context(|| format!("failed to build controller '{}' ({})", spec.name, spec.driver))?;
        Ok(Arc::new(Controller::new(spec.name.clone(), driver)))
    }

    /// Instantiate every controller and channel of `spec`.
    pub async fn instantiate(&self, spec: &PoolSpec) -> Result<Pool> {
        let mut pool = Pool::new();
        for ctrl_spec in &spec.controllers {
            if pool.controller(&ctrl_spec.name).is_ok() {
                bail!("controller '{}' is declared twice", ctrl_spec.name);
            }
            let controller = self.build_controller(ctrl_spec).await?;
            let capabilities = controller.capabilities().clone();
            pool.add_controller(controller.clone())?;

            for ch_spec in &ctrl_spec.channels {
                let kind = match ch_spec.kind.or_else(|| capabilities.kinds.first().copied()) {
                    Some(kind) => kind,
                    None => bail!("controller '{}' provides no channel kinds", ctrl_spec.name),
                };
                if !capabilities.provides(kind) {
                    bail!(
                        "controller '{}' does not provide {:?} channels (channel '{}')",
                        ctrl_spec.name,
                        kind,
                        ch_spec.name
                    );
                }
                let channel = Channel::new(ch_spec.name.clone(), ch_spec.axis, kind, controller.clone());
                pool.add_channel(Arc::new(channel))?;
            }
            tracing::debug!(
                controller = %ctrl_spec.name,
                channels = ctrl_spec.channels.len(),
                "Controller added to pool"
            );
        }
        tracing::info!(
            controllers = pool.controllers.len(),
            channels = pool.channels.len(),
            "Pool instantiated"
        );
        Ok(pool)
    }
}

impl FactoryRegistry for ControllerRegistry {
    fn register_factory(&self, factory: Box<dyn ControllerFactory>) {
        let driver_type = factory.driver_type().to_string();
        tracing::info!(
            driver_type = %driver_type,
            name = %factory.name(),
            "Registering driver factory"
        );
        self.factories.insert(driver_type, factory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software_synch::DRIVER_TYPE;

    const POOL: &str = r#"
        [[controllers]]
        name = "swtg"
        driver = "software_trigger_gate"
        channels = [{ name = "tg01", axis = 1 }]
    "#;

    #[test]
    fn test_software_factory_is_builtin() {
        let registry = ControllerRegistry::new();
        assert!(registry.has_factory(DRIVER_TYPE));
        assert_eq!(registry.list_factories(), vec![DRIVER_TYPE.to_string()]);
        assert!(registry.unregister_factory(DRIVER_TYPE).is_some());
        assert!(!registry.has_factory(DRIVER_TYPE));
    }

    #[tokio::test]
    async fn test_instantiate_pool() {
        let registry = ControllerRegistry::new();
        let pool = registry
            .instantiate(&PoolSpec::from_toml(POOL).unwrap())
            .await
            .unwrap();

        let tg = pool.channel("tg01").unwrap();
        assert_eq!(tg.kind(), ChannelKind::TriggerGate);
        assert_eq!(tg.axis(), 1);
        assert!(pool.controller("swtg").unwrap().supports_listener_registration());
        assert_eq!(pool.channels_of("swtg").count(), 1);
        assert!(matches!(pool.channel("nope"), Err(AcqError::UnknownElement(_))));
    }

    #[tokio::test]
    async fn test_unknown_driver_lists_available() {
        let registry = ControllerRegistry::new();
        let spec = PoolSpec::from_toml(
            r#"
            [[controllers]]
            name = "ctctrl01"
            driver = "no_such_driver"
            "#,
        )
        .unwrap();
        let err = registry.instantiate(&spec).await.unwrap_err().to_string();
        assert!(err.contains("no_such_driver"));
        assert!(err.contains(DRIVER_TYPE));
    }

    #[tokio::test]
    async fn test_rejects_duplicates_and_foreign_kinds() {
        let registry = ControllerRegistry::new();
        let twice = PoolSpec::from_toml(&format!("{POOL}\n{POOL}")).unwrap();
        assert!(registry.instantiate(&twice).await.is_err());

        let wrong_kind = PoolSpec::from_toml(
            r#"
            [[controllers]]
            name = "swtg"
            driver = "software_trigger_gate"
            channels = [{ name = "ct01", axis = 1, kind = "counter_timer" }]
            "#,
        )
        .unwrap();
        let err = registry.instantiate(&wrong_kind).await.unwrap_err();
        assert!(err.to_string().contains("ct01"));
    }

    #[test]
    fn test_settings_are_flattened() {
        let spec = PoolSpec::from_toml(
            r#"
            [[controllers]]
            name = "ctctrl01"
            driver = "mock_counter_timer"
            count_rate = 16.0
            seed = 7
            "#,
        )
        .unwrap();
        let settings = &spec.controllers[0].settings;
        assert_eq!(settings.get("count_rate"), Some(&toml::Value::Float(16.0)));
        assert!(!settings.contains_key("driver"));
    }
}
