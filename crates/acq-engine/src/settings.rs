//! Engine settings loaded with Figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults ([`EngineSettings::default`])
//! 2. an optional TOML file
//! 3. environment variables prefixed with `ACQ_` (e.g. `ACQ_MAX_WORKERS=4`)
//!
//! # Example
//! ```no_run
//! use acq_engine::settings::EngineSettings;
//!
//! let settings = EngineSettings::load_from("config/engine.toml")?;
//! settings.validate().map_err(anyhow::Error::msg)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of the environment variables overriding settings.
pub const ENV_PREFIX: &str = "ACQ_";

/// Timing and resource settings of the acquisition engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Sleep between poll iterations of counter/timer actions (seconds)
    pub acq_loop_sleep_time: f64,
    /// Read values every N state polls
    pub acq_loop_states_per_value: u32,
    /// Sleep between 0D reads (seconds)
    pub zerod_sleep_time: f64,
    /// Sleep between trigger/gate state polls (seconds)
    pub synch_sleep_time: f64,
    /// Maximum number of concurrently running action loops
    pub max_workers: usize,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            acq_loop_sleep_time: 0.01,
            acq_loop_states_per_value: 10,
            zerod_sleep_time: 0.01,
            synch_sleep_time: 0.01,
            max_workers: 8,
            log_level: "info".to_string(),
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by the environment only.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Defaults, then `path` (if it exists), then the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }
        for (name, value) in [
            ("acq_loop_sleep_time", self.acq_loop_sleep_time),
            ("zerod_sleep_time", self.zerod_sleep_time),
            ("synch_sleep_time", self.synch_sleep_time),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(format!("Invalid {} {}. Must be positive", name, value));
            }
        }
        if self.acq_loop_states_per_value == 0 {
            return Err("acq_loop_states_per_value must be at least 1".to_string());
        }
        if self.max_workers == 0 {
            return Err("max_workers must be at least 1".to_string());
        }
        Ok(())
    }

    /// Poll period of counter/timer actions.
    pub fn acq_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.acq_loop_sleep_time)
    }

    /// Read period of 0D actions.
    pub fn zerod_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.zerod_sleep_time)
    }

    /// Poll period of trigger/gate actions.
    pub fn synch_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.synch_sleep_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.acq_sleep(), Duration::from_millis(10));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_workers = 2\nzerod_sleep_time = 0.05").unwrap();

        let settings = EngineSettings::load_from(file.path()).unwrap();
        assert_eq!(settings.max_workers, 2);
        assert_eq!(settings.zerod_sleep_time, 0.05);
        assert_eq!(settings.acq_loop_states_per_value, 10);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = EngineSettings::load_from("/nonexistent/engine.toml").unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("engine.toml", "max_workers = 2\nlog_level = \"debug\"")?;
            jail.set_env("ACQ_MAX_WORKERS", "16");

            let settings = EngineSettings::load_from("engine.toml")?;
            assert_eq!(settings.max_workers, 16);
            assert_eq!(settings.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_validation_errors() {
        let mut settings = EngineSettings {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(settings.validate().unwrap_err().contains("log_level"));

        settings.log_level = "info".into();
        settings.acq_loop_sleep_time = 0.0;
        assert!(settings.validate().unwrap_err().contains("acq_loop_sleep_time"));

        settings.acq_loop_sleep_time = 0.01;
        settings.max_workers = 0;
        assert!(settings.validate().is_err());
    }
}
