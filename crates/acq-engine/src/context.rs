//! Acquisition requests and the per-run context passed down the call chain.

use crate::settings::EngineSettings;
use acq_core::config::{AcquisitionConfig, MasterKey};
use acq_core::driver::SynchDescription;
use acq_core::error::{AcqError, AcqResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Identity of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunContext {
    /// Unique per run.
    pub run_id: Uuid,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Run number within the orchestrator, starting at 1.
    pub sequence: u64,
}

impl RunContext {
    /// Context of run number `sequence`.
    pub fn new(sequence: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            sequence,
        }
    }
}

/// What the caller asks the orchestrator to do.
///
/// Exactly one of `integ_time` and `monitor_count` must be set.
///
/// ```rust,ignore
/// let request = AcquisitionRequest::integ_time(config, 0.1)
///     .synchronized(10)
///     .with_latency(0.01);
/// ```
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    /// Channels to acquire.
    pub config: Arc<AcquisitionConfig>,
    /// Integration time in seconds
    pub integ_time: Option<f64>,
    /// Stop after this many monitor counts
    pub monitor_count: Option<u64>,
    /// Continuous acquisition paced by trigger/gate elements
    pub synchronized: bool,
    /// Number of sequential single-shot acquisitions
    pub multiple: u32,
    /// Repetitions of a synchronized acquisition
    pub repetitions: u64,
    /// Dead time between repetitions (seconds)
    pub latency_time: f64,
    /// Explicit edge timing; synthesized from integ/latency time when absent
    pub synchronization: Option<SynchDescription>,
    /// Overrides `acq_loop_sleep_time`
    pub acq_sleep_time: Option<Duration>,
    /// Overrides `acq_loop_states_per_value`
    pub nb_states_per_value: Option<u32>,
    /// Trigger edge index of a per-edge run
    pub idx: Option<u64>,
    /// Run the counter/timer loop inside `run` and skip the 0D action
    pub inline: bool,
}

impl AcquisitionRequest {
    fn base(config: Arc<AcquisitionConfig>) -> Self {
        Self {
            config,
            integ_time: None,
            monitor_count: None,
            synchronized: false,
            multiple: 1,
            repetitions: 1,
            latency_time: 0.0,
            synchronization: None,
            acq_sleep_time: None,
            nb_states_per_value: None,
            idx: None,
            inline: false,
        }
    }

    /// Request paced by the global timer.
    pub fn integ_time(config: Arc<AcquisitionConfig>, integ_time: f64) -> Self {
        Self {
            integ_time: Some(integ_time),
            ..Self::base(config)
        }
    }

    /// Request paced by the global monitor.
    pub fn monitor_count(config: Arc<AcquisitionConfig>, count: u64) -> Self {
        Self {
            monitor_count: Some(count),
            ..Self::base(config)
        }
    }

    /// Request with neither master value set; for callers filling fields
    /// themselves.
    pub fn empty(config: Arc<AcquisitionConfig>) -> Self {
        Self::base(config)
    }

    /// Pace `repetitions` repetitions with trigger/gate elements.
    pub fn synchronized(mut self, repetitions: u64) -> Self {
        self.synchronized = true;
        self.repetitions = repetitions;
        self
    }

    /// Run `n` single-shot acquisitions back to back.
    pub fn multiple(mut self, n: u32) -> Self {
        self.multiple = n;
        self
    }

    /// Dead time between repetitions (s).
    pub fn with_latency(mut self, latency_time: f64) -> Self {
        self.latency_time = latency_time;
        self
    }

    /// Explicit trigger/gate description.
    pub fn with_synchronization(mut self, description: SynchDescription) -> Self {
        self.synchronization = Some(description);
        self
    }

    /// Override the poll period and value read cadence.
    pub fn with_sleep(mut self, sleep: Duration, nb_states_per_value: u32) -> Self {
        self.acq_sleep_time = Some(sleep);
        self.nb_states_per_value = Some(nb_states_per_value);
        self
    }

    /// Edge index of a per-edge run.
    pub fn with_idx(mut self, idx: u64) -> Self {
        self.idx = Some(idx);
        self
    }

    /// Run the counter/timer action on the calling task, without 0D.
    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }
}

/// The master value a run is paced by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MasterValue {
    /// Integration time (s)
    IntegrationTime(f64),
    /// Monitor counts
    MonitorCount(u64),
}

impl MasterValue {
    /// Which global channel this value is for.
    pub fn key(self) -> MasterKey {
        match self {
            MasterValue::IntegrationTime(_) => MasterKey::Timer,
            MasterValue::MonitorCount(_) => MasterKey::Monitor,
        }
    }

    /// Value handed to `load_one` / `start_one`; monitor counts are negative.
    pub fn driver_value(self) -> f64 {
        match self {
            MasterValue::IntegrationTime(t) => t,
            MasterValue::MonitorCount(n) => -(n as f64),
        }
    }
}

/// Validated run parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionParams {
    /// Timer or monitor value of the run.
    pub master: MasterValue,
    /// Poll period.
    pub acq_sleep: Duration,
    /// Read values every N polls.
    pub nb_states_per_value: u32,
    /// Repetitions programmed into the controllers.
    pub repetitions: u64,
    /// Dead time between repetitions (s).
    pub latency_time: f64,
    /// Edge index of a per-edge run.
    pub idx: Option<u64>,
}

impl AcquisitionParams {
    /// Validate a request. Never touches hardware.
    ///
    /// # Errors
    /// `AcqError::Configuration` when both or neither master values are
    /// given, the integration time is not positive, the monitor count is zero
    /// or a synchronized request has no repetitions.
    pub fn from_request(request: &AcquisitionRequest, settings: &EngineSettings) -> AcqResult<Self> {
        let master = match (request.integ_time, request.monitor_count) {
            (Some(_), Some(_)) => {
                return Err(AcqError::Configuration(
                    "integ_time and monitor_count are mutually exclusive".to_string(),
                ))
            }
            (None, None) => {
                return Err(AcqError::Configuration(
                    "one of integ_time or monitor_count is required".to_string(),
                ))
            }
            (Some(t), None) if !(t > 0.0 && t.is_finite()) => {
                return Err(AcqError::Configuration(format!(
                    "integ_time must be positive, got {}",
                    t
                )))
            }
            (Some(t), None) => MasterValue::IntegrationTime(t),
            (None, Some(0)) => {
                return Err(AcqError::Configuration(
                    "monitor_count must be positive".to_string(),
                ))
            }
            (None, Some(n)) => MasterValue::MonitorCount(n),
        };
        if request.synchronized && request.repetitions == 0 {
            return Err(AcqError::Configuration(
                "synchronized acquisition needs at least one repetition".to_string(),
            ));
        }
        if request.latency_time < 0.0 {
            return Err(AcqError::Configuration(format!(
                "latency_time must not be negative, got {}",
                request.latency_time
            )));
        }
        Ok(Self {
            master,
            acq_sleep: request.acq_sleep_time.unwrap_or_else(|| settings.acq_sleep()),
            nb_states_per_value: request
                .nb_states_per_value
                .unwrap_or(settings.acq_loop_states_per_value)
                .max(1),
            repetitions: request.repetitions,
            latency_time: request.latency_time,
            idx: request.idx,
        })
    }

    /// Copy tagged with edge index `idx`.
    pub fn with_idx(&self, idx: u64) -> Self {
        Self {
            idx: Some(idx),
            ..self.clone()
        }
    }

    /// Edge timing of a synchronized run.
    pub fn synch_description(&self, request: &AcquisitionRequest) -> AcqResult<SynchDescription> {
        if let Some(description) = request.synchronization {
            return Ok(description);
        }
        match self.master {
            MasterValue::IntegrationTime(t) => Ok(SynchDescription::new(
                0.0,
                t,
                self.latency_time,
                self.repetitions,
            )),
            MasterValue::MonitorCount(_) => Err(AcqError::Configuration(
                "monitor paced synchronization needs an explicit synchronization description"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Arc<AcquisitionConfig> {
        Arc::new(AcquisitionConfig::empty())
    }

    #[test]
    fn test_exactly_one_master_value() {
        let settings = EngineSettings::default();
        let mut both = AcquisitionRequest::integ_time(config(), 0.1);
        both.monitor_count = Some(10);
        assert!(matches!(
            AcquisitionParams::from_request(&both, &settings),
            Err(AcqError::Configuration(_))
        ));
        assert!(AcquisitionParams::from_request(&AcquisitionRequest::empty(config()), &settings)
            .is_err());
        assert!(
            AcquisitionParams::from_request(&AcquisitionRequest::integ_time(config(), -1.0), &settings)
                .is_err()
        );
    }

    #[test]
    fn test_monitor_count_encoded_negative() {
        let params = AcquisitionParams::from_request(
            &AcquisitionRequest::monitor_count(config(), 500),
            &EngineSettings::default(),
        )
        .unwrap();
        assert_eq!(params.master.key(), MasterKey::Monitor);
        assert_eq!(params.master.driver_value(), -500.0);
    }

    #[test]
    fn test_settings_fill_loop_timing() {
        let settings = EngineSettings::default();
        let params =
            AcquisitionParams::from_request(&AcquisitionRequest::integ_time(config(), 0.1), &settings)
                .unwrap();
        assert_eq!(params.acq_sleep, settings.acq_sleep());
        assert_eq!(params.nb_states_per_value, 10);

        let request = AcquisitionRequest::integ_time(config(), 0.1)
            .with_sleep(Duration::from_millis(1), 0);
        let params = AcquisitionParams::from_request(&request, &settings).unwrap();
        assert_eq!(params.nb_states_per_value, 1);
    }

    #[test]
    fn test_synch_description_synthesized() {
        let request = AcquisitionRequest::integ_time(config(), 0.2)
            .synchronized(5)
            .with_latency(0.05);
        let params = AcquisitionParams::from_request(&request, &EngineSettings::default()).unwrap();
        assert_eq!(
            params.synch_description(&request).unwrap(),
            SynchDescription::new(0.0, 0.2, 0.05, 5)
        );

        let request = AcquisitionRequest::integ_time(config(), 0.2).synchronized(0);
        assert!(AcquisitionParams::from_request(&request, &EngineSettings::default()).is_err());
    }
}
