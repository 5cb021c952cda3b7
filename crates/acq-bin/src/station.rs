//! Station files: a pool of controllers plus one measurement group.
//!
//! ```toml
//! [[controllers]]
//! name = "ctctrl01"
//! driver = "mock_counter_timer"
//! channels = [{ name = "ct01", axis = 1 }]
//!
//! [measurement_group]
//! name = "mntgrp01"
//!
//! [[measurement_group.controllers]]
//! name = "ctctrl01"
//! channels = [{ name = "ct01" }]
//! ```

use acq_core::value::{IndexedValue, ValueReading};
use acq_engine::{ControllerRegistry, ControllerSpec, MeasurementGroup, MeasurementGroupSpec, Pool, PoolSpec};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Station {
    #[serde(default)]
    pub controllers: Vec<ControllerSpec>,
    pub measurement_group: MeasurementGroupSpec,
}

impl Station {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read station file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid station file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Build every controller with the simulated drivers registered.
    pub async fn instantiate(&self) -> Result<Pool> {
        let registry = ControllerRegistry::new();
        acq_driver_mock::register_all(&registry);
        registry
            .instantiate(&PoolSpec {
                controllers: self.controllers.clone(),
            })
            .await
    }
}

/// Last committed value of every enabled channel.
pub fn last_values(group: &MeasurementGroup) -> IndexMap<String, Option<ValueReading>> {
    group
        .config()
        .channels()
        .filter(|c| c.enabled)
        .map(|c| (c.channel.name().to_string(), c.channel.value()))
        .collect()
}

/// Indexed value buffer of every enabled channel.
pub fn buffers(group: &MeasurementGroup) -> IndexMap<String, Vec<IndexedValue>> {
    group
        .config()
        .channels()
        .filter(|c| c.enabled)
        .map(|c| (c.channel.name().to_string(), c.channel.value_buffer()))
        .collect()
}

pub fn describe(group: &MeasurementGroup) -> Value {
    let config = group.config();
    let channels: Vec<Value> = config
        .channels()
        .map(|c| {
            json!({
                "name": c.channel.name(),
                "controller": c.channel.controller().name(),
                "kind": c.channel.kind(),
                "enabled": c.enabled,
                "state": c.channel.state(),
                "trigger_type": c.channel.trigger_type(),
            })
        })
        .collect();
    json!({
        "name": group.name(),
        "timer": config.timer(),
        "monitor": config.monitor(),
        "state": group.state(),
        "channels": channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION: &str = include_str!("../../../config/demo.toml");

    #[test]
    fn test_demo_station_parses() {
        let station = Station::parse(STATION).unwrap();
        assert!(!station.controllers.is_empty());
        assert!(!station.measurement_group.controllers.is_empty());
    }

    #[tokio::test]
    async fn test_demo_station_instantiates() {
        let station = Station::parse(STATION).unwrap();
        let pool = station.instantiate().await.unwrap();
        for ctrl in &station.measurement_group.controllers {
            assert!(pool.controller(&ctrl.name).is_ok());
            for ch in &ctrl.channels {
                assert!(pool.channel(&ch.name).is_ok());
            }
        }
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Station::load(&dir.path().join("nope.toml")).await.unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
