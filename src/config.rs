use crate::energy_tracker::STOP_GRACE;
use crate::supervisor::{PIPE_DRAIN_TIMEOUT, TERMINATE_GRACE};
use crate::utils::errors::MonitoringError;
use chrono::{DateTime, Local};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RATE_HZ: f64 = 2.0;
pub const DEFAULT_COUNTRY_CODE: &str = "ITA";
/// Bound on waiting for the sampling loop to stop.
pub const SAMPLER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Slack on top of the summed shutdown timeouts before an interrupted run gives up.
pub const CLEANUP_MARGIN: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Run a command while recording system, GPU and energy telemetry",
    override_usage = "emt-sidecar [-f <HZ>] [-c <CODE>] [-o <FILE>] <COMMAND> [ARGS]..."
)]
pub struct Cli {
    /// Sampling rate in Hz
    #[arg(short = 'f', long = "frequency", value_name = "HZ", default_value_t = DEFAULT_RATE_HZ, value_parser = parse_rate)]
    pub rate_hz: f64,

    /// ISO 3166 alpha-3 region code used for carbon intensity
    #[arg(short = 'c', long = "country", value_name = "CODE", default_value = DEFAULT_COUNTRY_CODE, value_parser = parse_country_code)]
    pub country_code: String,

    /// CSV file to write samples to [default: gpu_energy_<timestamp>.csv]
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw
        .parse()
        .map_err(|_| format!("`{}` is not a number", raw))?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(format!("rate must be a positive number of Hz, got {}", raw));
    }
    Duration::try_from_secs_f64(1.0 / rate)
        .map_err(|_| format!("rate {} Hz is too low to schedule", raw))?;
    Ok(rate)
}

fn parse_country_code(raw: &str) -> Result<String, String> {
    if raw.len() == 3 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(raw.to_ascii_uppercase())
    } else {
        Err(format!("`{}` is not a three-letter ISO country code", raw))
    }
}

pub fn default_output_path(now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("gpu_energy_{}.csv", now.format("%Y%m%d_%H%M%S")))
}

/// Everything a session needs to know, validated.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rate_hz: f64,
    pub country_code: String,
    pub output: PathBuf,
    pub command: Vec<String>,
    pub join_timeout: Duration,
    /// Print the one-line status after each sample
    pub live_status: bool,
}

impl SessionConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, MonitoringError> {
        let output = cli
            .output
            .unwrap_or_else(|| default_output_path(Local::now()));
        if output.is_dir() {
            return Err(MonitoringError::Configuration(format!(
                "output {} is a directory",
                output.display()
            )));
        }
        if cli.command.is_empty() {
            return Err(MonitoringError::Configuration("no command given".to_string()));
        }
        Ok(Self {
            rate_hz: cli.rate_hz,
            country_code: cli.country_code,
            output,
            command: cli.command,
            join_timeout: SAMPLER_JOIN_TIMEOUT,
            live_status: true,
        })
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    /// How long shutdown may run after an interrupt before the process exits regardless.
    /// Covers the worst case of every bounded step: terminate then kill the child, drain
    /// both pipes, join the sampler, join the tracker's measurement task.
    pub fn cleanup_grace(&self) -> Duration {
        TERMINATE_GRACE
            + PIPE_DRAIN_TIMEOUT * 2
            + self.join_timeout
            + self.sampling_interval()
            + STOP_GRACE
            + CLEANUP_MARGIN
    }
}
