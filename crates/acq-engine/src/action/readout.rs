//! Raw state and value reads.
//!
//! Reads go through the driver triads controller by controller. A failing
//! controller never aborts the cycle: its error is attached to every channel
//! it covers and the other controllers are still read.

use acq_core::channel::Channel;
use acq_core::controller::Controller;
use acq_core::error::DriverResult;
use acq_core::state::StateInfo;
use acq_core::value::ValueReading;
use futures::future::join_all;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::warn;

/// Channels of one controller taking part in an action.
#[derive(Debug, Clone)]
pub struct ControllerChannels {
    /// The controller.
    pub controller: Arc<Controller>,
    /// Channels in first-appearance order.
    pub channels: Vec<Arc<Channel>>,
}

impl ControllerChannels {
    /// Controller name.
    pub fn name(&self) -> &str {
        self.controller.name()
    }
}

/// Group channels by controller, keeping first-appearance order for both.
pub fn group_by_controller(channels: &[Arc<Channel>]) -> Vec<ControllerChannels> {
    let mut groups: IndexMap<String, ControllerChannels> = IndexMap::new();
    for channel in channels {
        groups
            .entry(channel.controller().name().to_string())
            .or_insert_with(|| ControllerChannels {
                controller: channel.controller().clone(),
                channels: Vec::new(),
            })
            .channels
            .push(channel.clone());
    }
    groups.into_values().collect()
}

async fn state_of(group: &ControllerChannels) -> DriverResult<Vec<StateInfo>> {
    let driver = group.controller.driver();
    driver.pre_state_all().await?;
    for channel in &group.channels {
        driver.pre_state_one(channel.axis()).await?;
    }
    driver.state_all().await?;
    let mut states = Vec::with_capacity(group.channels.len());
    for channel in &group.channels {
        states.push(driver.state_one(channel.axis()).await?);
    }
    Ok(states)
}

async fn values_of(group: &ControllerChannels) -> DriverResult<Vec<ValueReading>> {
    let driver = group.controller.driver();
    driver.pre_read_all().await?;
    for channel in &group.channels {
        driver.pre_read_one(channel.axis()).await?;
    }
    driver.read_all().await?;
    let mut values = Vec::with_capacity(group.channels.len());
    for channel in &group.channels {
        values.push(ValueReading::new(driver.read_one(channel.axis()).await?));
    }
    Ok(values)
}

/// Read the state of every channel without committing it.
pub async fn raw_read_state_info(groups: &[ControllerChannels]) -> Vec<(Arc<Channel>, StateInfo)> {
    let results = join_all(groups.iter().map(state_of)).await;
    let mut out = Vec::new();
    for (group, result) in groups.iter().zip(results) {
        match result {
            Ok(states) => out.extend(group.channels.iter().cloned().zip(states)),
            Err(err) => {
                warn!(controller = %group.name(), error = %err, "State read failed");
                let fault = StateInfo::fault(&err);
                out.extend(group.channels.iter().map(|c| (c.clone(), fault.clone())));
            }
        }
    }
    out
}

/// Read the value of every channel without committing it.
///
/// Controllers are read concurrently unless `serial` is set.
pub async fn raw_read_values(
    groups: &[ControllerChannels],
    serial: bool,
) -> Vec<(Arc<Channel>, ValueReading)> {
    let results = if serial {
        let mut results = Vec::with_capacity(groups.len());
        for group in groups {
            results.push(values_of(group).await);
        }
        results
    } else {
        join_all(groups.iter().map(values_of)).await
    };

    let mut out = Vec::new();
    for (group, result) in groups.iter().zip(results) {
        match result {
            Ok(values) => out.extend(group.channels.iter().cloned().zip(values)),
            Err(err) => {
                warn!(controller = %group.name(), error = %err, "Value read failed");
                let failed = ValueReading::failed(&err);
                out.extend(group.channels.iter().map(|c| (c.clone(), failed.clone())));
            }
        }
    }
    out
}

/// Whether any state in `states` is busy.
pub fn any_busy(states: &[(Arc<Channel>, StateInfo)]) -> bool {
    states.iter().any(|(_, info)| info.is_busy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ct_controller, tg_element};
    use acq_core::driver::ControllerCapabilities;
    use acq_core::state::ChannelState;

    #[test]
    fn test_group_by_controller_keeps_order() {
        let a = ct_controller("a", &["a1", "a2"]);
        let b = ct_controller("b", &["b1"]);
        let ch = |cfg: &acq_core::config::ControllerConfig, name: &str| {
            cfg.channels[name].channel.clone()
        };
        let channels = vec![ch(&b, "b1"), ch(&a, "a2"), ch(&a, "a1")];
        let groups = group_by_controller(&channels);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name(), "b");
        let names: Vec<&str> = groups[1].channels.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a2", "a1"]);
    }

    #[tokio::test]
    async fn test_raw_reads_cover_every_channel() {
        let a = ct_controller("a", &["a1", "a2"]);
        let tg = tg_element("tg", ControllerCapabilities::trigger_gate(false));
        let mut channels: Vec<_> = a.channels.values().map(|c| c.channel.clone()).collect();
        channels.push(tg);
        let groups = group_by_controller(&channels);

        let states = raw_read_state_info(&groups).await;
        assert_eq!(states.len(), 3);
        assert!(states.iter().all(|(_, s)| s.state == ChannelState::On));
        assert!(!any_busy(&states));

        let values = raw_read_values(&groups, true).await;
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|(_, v)| v.is_empty()));
    }
}
