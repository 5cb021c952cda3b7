//! Call plumbing shared by every simulated controller.

use crate::common::{CallLog, ErrorConfig, MockMode, TimingConfig};
use acq_core::error::DriverResult;
use tracing::trace;

/// Records, delays and fault-injects every driver call.
#[derive(Debug, Clone)]
pub(crate) struct SimIo {
    pub(crate) name: String,
    pub(crate) driver_type: &'static str,
    pub(crate) log: CallLog,
    pub(crate) errors: ErrorConfig,
    pub(crate) mode: MockMode,
    pub(crate) timing: TimingConfig,
}

impl SimIo {
    pub(crate) async fn call(&self, operation: &'static str, axis: Option<u32>) -> DriverResult<()> {
        trace!(controller = %self.name, operation, ?axis, "driver call");
        self.log.record(&self.name, operation, axis);
        if let Some(delay) = self.timing.call_delay(self.mode) {
            tokio::time::sleep(delay).await;
        }
        self.errors.check_operation(self.driver_type, operation)
    }

    pub(crate) async fn bulk_read(&self) -> DriverResult<()> {
        self.call("read_all", None).await?;
        if let Some(delay) = self.timing.readout_delay(self.mode) {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// Error config for `mode`, keeping explicitly injected errors.
    pub(crate) fn errors_for(mode: MockMode, errors: Option<ErrorConfig>, seed: Option<u64>) -> ErrorConfig {
        match errors {
            Some(errors) => errors,
            None if mode.failure_rate() > 0.0 => {
                ErrorConfig::random_failures_seeded(mode.failure_rate(), seed)
            }
            None => ErrorConfig::none(),
        }
    }
}
