//! Controller set partitioning.
//!
//! Splits a merged acquisition configuration into the controllers clocked by
//! a software trigger/gate generator and the ones clocked by hardware, and
//! extracts the trigger/gate elements a configuration references.
//!
//! A controller is "software" when the controller behind its trigger element
//! supports listener registration. The capability is the snapshot taken when
//! the controller was registered; nothing is queried here.

use crate::action::readout::{group_by_controller, ControllerChannels};
use acq_core::channel::Channel;
use acq_core::config::{AcquisitionConfig, ControllerConfig, MasterKey};
use std::collections::HashSet;
use std::sync::Arc;

/// Disjoint software/hardware halves of a configuration.
#[derive(Debug, Clone)]
pub struct SplitConfiguration {
    /// Controllers paced by hardware generators.
    pub hardware: AcquisitionConfig,
    /// Controllers paced by software edges.
    pub software: AcquisitionConfig,
}

fn is_software(ctrl: &ControllerConfig) -> Option<bool> {
    ctrl.trigger_element
        .as_ref()
        .map(|element| element.controller().supports_listener_registration())
}

/// Master channel of a partition.
///
/// The global master wins when its controller is in the partition; otherwise
/// the local master of the first controller (configuration order) that has
/// one is used.
fn partition_master(
    config: &AcquisitionConfig,
    members: &[&ControllerConfig],
    key: MasterKey,
) -> Option<String> {
    if let Some(global) = config.master(key) {
        if members.iter().any(|c| c.channels.contains_key(global)) {
            return Some(global.to_string());
        }
    }
    members
        .iter()
        .find_map(|c| c.master(key).map(str::to_string))
}

fn partition(config: &AcquisitionConfig, software: bool) -> AcquisitionConfig {
    let members: Vec<&ControllerConfig> = config
        .controllers()
        .filter(|c| is_software(c) == Some(software))
        .collect();
    let timer = partition_master(config, &members, MasterKey::Timer);
    let monitor = partition_master(config, &members, MasterKey::Monitor);
    config.subset(|c| is_software(c) == Some(software), timer, monitor)
}

/// Split `config` by trigger source. Controllers without a trigger element
/// appear in neither half.
pub fn split_configurations(config: &AcquisitionConfig) -> SplitConfiguration {
    SplitConfiguration {
        hardware: partition(config, false),
        software: partition(config, true),
    }
}

/// Trigger/gate elements referenced by `config`, deduplicated and grouped by
/// controller in order of first reference.
pub fn trigger_gate_configuration(config: &AcquisitionConfig) -> Vec<ControllerChannels> {
    let mut seen = HashSet::new();
    let elements: Vec<Arc<Channel>> = config
        .controllers()
        .flat_map(|ctrl| {
            ctrl.trigger_element
                .iter()
                .chain(ctrl.channels.values().filter_map(|c| c.trigger_element.as_ref()))
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|element| seen.insert(element.name().to_string()))
        .collect();
    group_by_controller(&elements)
}
