//! Fixtures shared by the unit tests of this crate.

use acq_core::channel::{Channel, ChannelKind};
use acq_core::config::ControllerConfig;
use acq_core::controller::Controller;
use acq_core::driver::{ControllerCapabilities, ControllerDriver};
use acq_core::error::DriverResult;
use acq_core::state::{ChannelState, StateInfo};
use acq_core::value::Payload;
use async_trait::async_trait;
use std::sync::Arc;

/// Driver that is always idle and reads nothing.
pub(crate) struct NullDriver {
    capabilities: ControllerCapabilities,
}

impl NullDriver {
    pub(crate) fn new(capabilities: ControllerCapabilities) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl ControllerDriver for NullDriver {
    fn driver_type(&self) -> &str {
        "null"
    }

    fn capabilities(&self) -> ControllerCapabilities {
        self.capabilities.clone()
    }

    async fn state_one(&self, _axis: u32) -> DriverResult<StateInfo> {
        Ok(StateInfo::from_state(ChannelState::On))
    }

    async fn read_one(&self, _axis: u32) -> DriverResult<Payload> {
        Ok(Payload::Empty)
    }
}

/// Counter/timer controller configuration with one enabled channel per name.
pub(crate) fn ct_controller(name: &str, channels: &[&str]) -> ControllerConfig {
    let ctrl = Arc::new(Controller::new(
        name,
        Arc::new(NullDriver::new(ControllerCapabilities::counter_timer())),
    ));
    channels
        .iter()
        .enumerate()
        .fold(ControllerConfig::new(ctrl.clone()), |cfg, (i, ch)| {
            cfg.with_channel(Arc::new(Channel::new(
                *ch,
                i as u32 + 1,
                ChannelKind::CounterTimer,
                ctrl.clone(),
            )))
        })
}

/// Trigger/gate element on a controller of its own.
pub(crate) fn tg_element(name: &str, capabilities: ControllerCapabilities) -> Arc<Channel> {
    let ctrl = Arc::new(Controller::new(
        format!("{}_ctrl", name),
        Arc::new(NullDriver::new(capabilities)),
    ));
    Arc::new(Channel::new(name, 1, ChannelKind::TriggerGate, ctrl))
}
