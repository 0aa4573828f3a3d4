mod utils {
    pub mod errors;
    pub mod logger;
    pub mod psutils;
}

// Telemetry sources
pub mod collectors;
pub mod energy_tracker;
pub mod carbon;

// Session pipeline
pub mod collector;
pub mod config;
pub mod estimator;
pub mod sample;
pub mod sample_log;
pub mod sampler;
pub mod session;
pub mod summary;
pub mod supervisor;

#[cfg(test)]
mod testing;

use clap::Parser;
use collectors::{ComponentModels, GpuReader, NvidiaGpu, PowerModel, Rapl, model::DEFAULT_CPU_TDP_WATTS};
use config::{Cli, SessionConfig};
use energy_tracker::{EmissionsTracker, EnergyTracker};
use log::{info, warn};
use session::{Session, SessionOutcome, Telemetry};
use std::io::Write;
use std::sync::Arc;
use supervisor::{ChildOutput, ExitReason};
use tokio_util::sync::CancellationToken;
use utils::errors::MonitoringError;
use utils::psutils::{SysinfoReader, total_memory_gb};

fn open_gpu() -> Option<Arc<dyn GpuReader>> {
    match NvidiaGpu::init() {
        Ok(gpu) if gpu.device_count() > 0 => Some(Arc::new(gpu) as Arc<dyn GpuReader>),
        Ok(_) => {
            println!("WARNING: no NVIDIA GPU found. Monitoring limited to CPU and memory.");
            None
        }
        Err(e) => {
            println!("WARNING: NVIDIA telemetry unavailable ({}). Monitoring limited to CPU and memory.", e);
            None
        }
    }
}

fn print_child_output(output: &ChildOutput) {
    if !output.stdout.is_empty() {
        println!("\n--- Process output ---\n{}", output.stdout.trim_end());
    }
    if !output.stderr.is_empty() {
        println!("\n--- Process errors ---\n{}", output.stderr.trim_end());
    }
}

fn exit(code: i32) -> ! {
    let _ = std::io::stdout().flush();
    std::process::exit(code)
}

#[tokio::main]
async fn main() {
    utils::logger::setup_logger();
    let config = match SessionConfig::from_cli(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(2);
        }
    };
    info!("Starting session: {:?}", config);

    let interval = config.sampling_interval();
    let cleanup_grace = config.cleanup_grace();
    let gpu = open_gpu();
    let components = ComponentModels::new(gpu.clone(), total_memory_gb());
    let trackers: Vec<Arc<dyn EmissionsTracker>> = vec![
        Arc::new(EnergyTracker::new(
            Rapl::new(None, components.clone()),
            interval,
            &config.country_code,
        )),
        Arc::new(EnergyTracker::new(
            PowerModel::new(DEFAULT_CPU_TDP_WATTS, components),
            interval,
            &config.country_code,
        )),
    ];
    let telemetry = Telemetry {
        system: Box::new(SysinfoReader::new()),
        gpu,
        trackers,
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nInterrupted; stopping the monitored process...");
            trigger.cancel();
        }
    });

    println!("Monitoring {:?} at {} Hz", config.command, config.rate_hz);
    let mut session = Session::new(config, telemetry, cancel.clone());

    let result = {
        let run = session.run();
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => Some(result),
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(cleanup_grace).await;
            } => None,
        }
    };

    match result {
        None => {
            warn!("Cleanup did not finish within {:?}; exiting", cleanup_grace);
            exit(0);
        }
        Some(Err(e @ MonitoringError::ChildLaunch(_))) => {
            eprintln!("Error: could not start the command: {}", e);
            exit(1);
        }
        Some(Err(e)) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
        Some(Ok(SessionOutcome::NotStarted)) => {
            println!("Interrupted before the command started.");
            exit(0);
        }
        Some(Ok(SessionOutcome::Finished(reason))) => {
            match &reason {
                ExitReason::Exited(output) => print_child_output(output),
                ExitReason::Cancelled(output) => {
                    println!("\nMonitoring interrupted by user.");
                    print_child_output(output);
                }
            }
            println!(
                "\nMonitoring complete. Data saved to: {}",
                session.output_path().display()
            );
            if let Some(summary) = session.summary() {
                println!("\n{}", summary);
            }
            exit(0);
        }
    }
}
