//! Error injection for simulated controllers.
//!
//! A controller can answer "not ready" to its `pre_*_one` checks, time out on
//! one operation, lose its link from a given operation onwards, or fail at
//! random with a seeded rate.

use super::rng::MockRng;
use acq_core::error::{DriverError, DriverErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error injection configuration for simulated controllers
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Probability (0.0 to 1.0) that any call fails
    failure_rate: f64,
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    link_lost: Arc<AtomicBool>,
}

/// A scripted controller failure.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Every call of `operation` times out
    Timeout { operation: &'static str },
    /// Answer "not ready" to a `pre_load_one` / `pre_start_one` call
    NotReady { operation: &'static str },
    /// The first call of `from`, and every call after it, fails with a
    /// communication error
    CommunicationLoss { from: &'static str },
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self::build(0.0, Vec::new(), None)
    }

    /// Every call fails with probability `rate`.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        Self::build(rate, Vec::new(), seed)
    }

    /// Config with one scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Config with several scenarios.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(0.0, scenarios, None)
    }

    fn build(failure_rate: f64, scenarios: Vec<ErrorScenario>, seed: Option<u64>) -> Self {
        Self {
            failure_rate,
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(seed)),
            link_lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a readiness check for `operation` should answer true.
    pub fn is_ready(&self, operation: &'static str) -> bool {
        !self
            .scenarios
            .iter()
            .any(|s| matches!(s, ErrorScenario::NotReady { operation: op } if *op == operation))
    }

    /// Error to return from `operation`, if any.
    pub fn check_operation(&self, driver_type: &str, operation: &'static str) -> Result<(), DriverError> {
        let link_lost = self.link_lost.load(Ordering::Acquire)
            || self.scenarios.iter().any(|s| {
                matches!(s, ErrorScenario::CommunicationLoss { from } if *from == operation)
            });
        if link_lost {
            self.link_lost.store(true, Ordering::Release);
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                format!("Communication lost during '{}'", operation),
            ));
        }

        let timed_out = self
            .scenarios
            .iter()
            .any(|s| matches!(s, ErrorScenario::Timeout { operation: op } if *op == operation));
        if timed_out {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Timeout,
                format!("Operation '{}' timed out", operation),
            ));
        }

        if self.rng.should_fail(self.failure_rate) {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Hardware,
                format!("Random failure on operation '{}'", operation),
            ));
        }
        Ok(())
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_errors() {
        let config = ErrorConfig::none();
        for _ in 0..100 {
            assert!(config.check_operation("sim", "read_one").is_ok());
        }
        assert!(config.is_ready("pre_start_one"));
    }

    #[test]
    fn test_random_failures() {
        let config = ErrorConfig::random_failures_seeded(0.5, Some(42));
        let failures = (0..1000)
            .filter(|_| config.check_operation("sim", "read_one").is_err())
            .count();
        assert!(failures > 400 && failures < 600, "Got {} failures", failures);
    }

    #[test]
    fn test_timeout_scenario() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "read_all",
        });
        let err = config.check_operation("sim", "read_all").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
        assert!(config.check_operation("sim", "read_one").is_ok());
    }

    #[test]
    fn test_not_ready() {
        let config = ErrorConfig::scenario(ErrorScenario::NotReady {
            operation: "pre_start_one",
        });
        assert!(!config.is_ready("pre_start_one"));
        assert!(config.is_ready("pre_load_one"));
        // readiness is not an error
        assert!(config.check_operation("sim", "pre_start_one").is_ok());
    }

    #[test]
    fn test_communication_loss_sticks() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss {
            from: "state_all",
        });
        assert!(config.check_operation("sim", "start_all").is_ok());

        let err = config.check_operation("sim", "state_all").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        // clones share the link
        let clone = config.clone();
        assert!(clone.check_operation("sim", "read_one").is_err());
    }
}
