//! Timing configuration for realistic mode.

use super::mode::MockMode;
use std::time::Duration;

/// Timing configuration for realistic mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Round trip of a single driver call in milliseconds
    pub communication_delay_ms: u64,
    /// Extra time a bulk read (`read_all`) takes in milliseconds
    pub readout_ms: u64,
}

impl TimingConfig {
    /// Counter/timer card behind a fast bus
    pub fn counter_timer() -> Self {
        Self {
            communication_delay_ms: 1,
            readout_ms: 2,
        }
    }

    /// Multimeter-like 0D device
    pub fn zero_d() -> Self {
        Self {
            communication_delay_ms: 2,
            readout_ms: 5,
        }
    }

    /// Pulse generator
    pub fn trigger_gate() -> Self {
        Self {
            communication_delay_ms: 1,
            readout_ms: 0,
        }
    }

    /// Delay to apply to a call in `mode`.
    pub fn call_delay(&self, mode: MockMode) -> Option<Duration> {
        match mode {
            MockMode::Realistic if self.communication_delay_ms > 0 => {
                Some(Duration::from_millis(self.communication_delay_ms))
            }
            _ => None,
        }
    }

    /// Delay to apply to a bulk read in `mode`.
    pub fn readout_delay(&self, mode: MockMode) -> Option<Duration> {
        match mode {
            MockMode::Realistic if self.readout_ms > 0 => {
                Some(Duration::from_millis(self.readout_ms))
            }
            _ => None,
        }
    }
}
