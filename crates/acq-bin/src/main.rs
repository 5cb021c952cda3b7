//! `acqd` - run acquisitions from the command line.
//!
//! A station file declares the controllers to instantiate and the
//! measurement group to acquire with:
//!
//! ```bash
//! acqd --station config/demo.toml count --integ-time 0.1
//! acqd --station config/demo.toml continuous --integ-time 0.01 --repetitions 20
//! acqd --station config/demo.toml state
//! ```
//!
//! Only the simulated controller drivers are linked in; results are printed
//! to stdout as JSON.

mod station;
mod telemetry;

use acq_engine::{Acquisition, EngineSettings, MeasurementGroup};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use telemetry::{LogFormat, TelemetryConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "acqd")]
#[command(about = "Synchronized counter/timer acquisitions", long_about = None)]
struct Cli {
    /// Station file (controllers and measurement group)
    #[arg(long, default_value = "config/demo.toml")]
    station: PathBuf,

    /// Engine settings file; ACQ_* environment variables override it
    #[arg(long, default_value = "config/engine.toml")]
    settings: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Single-shot acquisition(s)
    Count {
        /// Integration time (seconds)
        #[arg(long, conflicts_with = "monitor_count")]
        integ_time: Option<f64>,
        /// Stop after this many monitor counts
        #[arg(long)]
        monitor_count: Option<u64>,
        /// Number of sequential acquisitions
        #[arg(long, default_value_t = 1)]
        multiple: u32,
    },

    /// Synchronized acquisition paced by the group's trigger/gate elements
    Continuous {
        #[arg(long)]
        integ_time: f64,
        #[arg(long, default_value_t = 10)]
        repetitions: u64,
        /// Dead time between repetitions (seconds)
        #[arg(long, default_value_t = 0.0)]
        latency_time: f64,
    },

    /// Print the group's configuration and aggregate state
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = EngineSettings::load_from(&cli.settings)
        .with_context(|| format!("failed to load settings from {}", cli.settings.display()))?;
    settings.validate().map_err(anyhow::Error::msg)?;
    telemetry::init(TelemetryConfig::from_settings(&settings, cli.log_format).map_err(anyhow::Error::msg)?)
        .map_err(anyhow::Error::msg)?;

    let station = station::Station::load(&cli.station).await?;
    let pool = station.instantiate().await?;
    let acquisition = Acquisition::new("acqd", settings)?;
    let group = MeasurementGroup::new(station.measurement_group.clone(), &pool, acquisition).await?;
    info!(group = %group.name(), channels = group.channels().len(), "Station ready");

    match cli.command {
        Commands::Count {
            integ_time,
            monitor_count,
            multiple,
        } => {
            let request = match (integ_time, monitor_count) {
                (_, Some(count)) => group.monitor_count_request(count),
                (Some(t), None) => group.integ_time_request(t),
                (None, None) => anyhow::bail!("one of --integ-time or --monitor-count is required"),
            };
            run_to_completion(&group, request.multiple(multiple)).await?;
            print_json(&station::last_values(&group))
        }
        Commands::Continuous {
            integ_time,
            repetitions,
            latency_time,
        } => {
            let request = group
                .integ_time_request(integ_time)
                .synchronized(repetitions)
                .with_latency(latency_time);
            run_to_completion(&group, request).await?;
            print_json(&station::buffers(&group))?;
            print_json(&group.acquisition().stats())
        }
        Commands::State => print_json(&station::describe(&group)),
    }
}

/// Run `request`, aborting on Ctrl-C.
async fn run_to_completion(group: &MeasurementGroup, request: acq_engine::AcquisitionRequest) -> Result<()> {
    let handle = group.start(request).await?;
    let run_id = handle.run_id();
    let wait = handle.wait();
    tokio::pin!(wait);
    tokio::select! {
        result = &mut wait => {
            result?;
            info!(%run_id, "Acquisition finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(%run_id, "Interrupted, aborting");
            group.abort().await?;
            tokio::time::timeout(Duration::from_secs(5), wait)
                .await
                .context("acquisition did not end after abort")??;
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
