//! Operational modes for simulated controllers.
//!
//! - **Instant**: no communication delay, deterministic behavior for unit tests
//! - **Realistic**: every driver call pays a hardware-like round trip
//! - **Chaos**: random driver failures for resilience testing

use serde::Deserialize;

/// Operational modes for simulated controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// No delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like call latency - for integration tests
    Realistic,
    /// Random failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// Failure rate applied to every operation in this mode.
    pub fn failure_rate(self) -> f64 {
        match self {
            MockMode::Chaos => 0.05,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
    }

    #[test]
    fn test_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: MockMode,
        }
        let w: Wrapper = toml::from_str("mode = \"realistic\"").unwrap();
        assert_eq!(w.mode, MockMode::Realistic);
    }

    #[test]
    fn test_only_chaos_fails() {
        assert_eq!(MockMode::Instant.failure_rate(), 0.0);
        assert!(MockMode::Chaos.failure_rate() > 0.0);
    }
}
