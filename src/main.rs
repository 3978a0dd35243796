use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use bioreactor_monitor::config::{load_config, save_config, MonitorConfig};
use bioreactor_monitor::error::Result;
use bioreactor_monitor::local::process_file::{self, RunOptions};
use bioreactor_monitor::local::simulate::{self, FaultKind, FaultWindow, SimulationConfig};
use bioreactor_monitor::utils::log::init_tracing;

#[derive(Parser)]
#[command(name = "bioreactor-monitor", version, about = "Streaming anomaly detection for bioreactor telemetry")]
struct Cli {
    /// YAML config; defaults to the engineering-limit setup
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a telemetry CSV through the detector bank and score it
    Evaluate {
        input: PathBuf,
        /// Fault-free telemetry CSV used to fit calibrated detectors
        #[arg(long)]
        calibration: Option<PathBuf>,
        /// Kernel model JSON, overrides the config
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        anomaly_log: Option<PathBuf>,
        /// Write the evaluation summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Use calibration-driven detectors when no config is given
        #[arg(long)]
        calibrated: bool,
    },
    /// Generate synthetic telemetry with optional injected faults
    Simulate {
        output: PathBuf,
        #[arg(long, default_value_t = 600)]
        frames: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, value_enum)]
        fault: Vec<FaultKind>,
        #[arg(long, default_value_t = 300)]
        fault_start: usize,
        #[arg(long, default_value_t = 120)]
        fault_length: usize,
    },
    /// Write a config file to start from
    InitConfig {
        output: PathBuf,
        #[arg(long)]
        calibrated: bool,
    },
}

fn resolve_config(path: Option<&PathBuf>, calibrated: bool) -> Result<MonitorConfig> {
    match path {
        Some(path) => load_config(path),
        None if calibrated => Ok(MonitorConfig::calibrated()),
        None => Ok(MonitorConfig::default()),
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Evaluate {
            input,
            calibration,
            model,
            anomaly_log,
            summary,
            calibrated,
        } => {
            let mut config = resolve_config(cli.config.as_ref(), calibrated)?;
            init_tracing(cli.verbose || config.verbose);
            if model.is_some() {
                config.kernel_model = model;
            }

            let report = process_file::run(
                &config,
                &RunOptions {
                    input,
                    calibration,
                    anomaly_log,
                    summary_json: summary,
                },
            )?;
            report.evaluation.print_summary();
            println!(
                "\n{} frames processed, {} skipped, {} anomalies logged",
                report.frames_processed.to_string().bold(),
                report.frames_skipped.to_string().yellow(),
                report.anomalies_logged.to_string().red()
            );
        }
        Command::Simulate {
            output,
            frames,
            seed,
            fault,
            fault_start,
            fault_length,
        } => {
            init_tracing(cli.verbose);
            let faults = fault
                .into_iter()
                .map(|kind| FaultWindow {
                    kind,
                    start: fault_start,
                    end: fault_start + fault_length,
                })
                .collect();
            let config = SimulationConfig {
                seed,
                frames,
                faults,
                ..SimulationConfig::default()
            };
            simulate::run(&config, &output)?;
        }
        Command::InitConfig { output, calibrated } => {
            init_tracing(cli.verbose);
            let config = if calibrated {
                MonitorConfig::calibrated()
            } else {
                MonitorConfig::default()
            };
            save_config(&config, &output)?;
            info!(path = %output.display(), "config written");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "bioreactor-monitor failed");
            eprintln!("{} {}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
