//! Controllers: one driver instance shared by several channels.

use crate::driver::{ControllerCapabilities, ControllerDriver};
use crate::error::{AcqError, AcqResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identity of whoever currently operates a controller (an orchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorId(Uuid);

impl OperatorId {
    /// Fresh, unique operator.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperatorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operator-{}", self.0.simple())
    }
}

/// A registered controller.
///
/// Capabilities are queried once, when the controller is created, and never
/// re-queried: classification of trigger sources relies on this snapshot.
pub struct Controller {
    name: String,
    driver: Arc<dyn ControllerDriver>,
    capabilities: ControllerCapabilities,
    operator: Mutex<Option<OperatorId>>,
}

impl Controller {
    /// Wrap `driver` under `name`.
    pub fn new(name: impl Into<String>, driver: Arc<dyn ControllerDriver>) -> Self {
        let capabilities = driver.capabilities();
        Self {
            name: name.into(),
            driver,
            capabilities,
            operator: Mutex::new(None),
        }
    }

    /// Name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver behind the controller.
    pub fn driver(&self) -> &Arc<dyn ControllerDriver> {
        &self.driver
    }

    /// Capabilities declared by the driver.
    pub fn capabilities(&self) -> &ControllerCapabilities {
        &self.capabilities
    }

    /// Whether the controller can be paced by a timer/monitor value.
    pub fn is_timerable(&self) -> bool {
        self.capabilities.timerable
    }

    /// Whether edges can be observed through listeners.
    pub fn supports_listener_registration(&self) -> bool {
        self.capabilities.supports_listener_registration
    }

    /// Claim the controller for `operator`.
    ///
    /// Claiming again with the same operator is a no-op.
    pub fn set_operator(&self, operator: OperatorId) -> AcqResult<()> {
        let mut current = self.operator.lock();
        match *current {
            Some(owner) if owner != operator => Err(AcqError::ControllerBusy {
                controller: self.name.clone(),
                operator: owner.to_string(),
            }),
            _ => {
                *current = Some(operator);
                Ok(())
            }
        }
    }

    /// Release the claim held by `operator`. Claims of other operators are
    /// left untouched.
    pub fn clear_operator(&self, operator: OperatorId) {
        let mut current = self.operator.lock();
        if *current == Some(operator) {
            *current = None;
        }
    }

    /// Current owner, if claimed.
    pub fn operator(&self) -> Option<OperatorId> {
        *self.operator.lock()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("driver_type", &self.driver.driver_type())
            .field("capabilities", &self.capabilities)
            .field("operator", &self.operator())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverResult;
    use crate::state::{ChannelState, StateInfo};
    use crate::value::Payload;
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl ControllerDriver for Idle {
        fn driver_type(&self) -> &str {
            "idle"
        }

        fn capabilities(&self) -> ControllerCapabilities {
            ControllerCapabilities::counter_timer()
        }

        async fn state_one(&self, _axis: u32) -> DriverResult<StateInfo> {
            Ok(StateInfo::from_state(ChannelState::On))
        }

        async fn read_one(&self, _axis: u32) -> DriverResult<Payload> {
            Ok(Payload::Scalar(0.0))
        }
    }

    #[test]
    fn test_operator_claim() {
        let ctrl = Controller::new("ctrl", Arc::new(Idle));
        let a = OperatorId::new();
        let b = OperatorId::new();

        ctrl.set_operator(a).unwrap();
        ctrl.set_operator(a).unwrap();
        assert!(matches!(
            ctrl.set_operator(b),
            Err(AcqError::ControllerBusy { .. })
        ));

        // only the owner releases
        ctrl.clear_operator(b);
        assert_eq!(ctrl.operator(), Some(a));
        ctrl.clear_operator(a);
        assert_eq!(ctrl.operator(), None);
        ctrl.set_operator(b).unwrap();
    }

    #[test]
    fn test_capabilities_cached() {
        let ctrl = Controller::new("ctrl", Arc::new(Idle));
        assert!(ctrl.is_timerable());
        assert!(!ctrl.supports_listener_registration());
    }
}
