//! CLI Entry Point for laser-sweep
//!
//! Provides command-line interface for:
//! - Running a sweep measurement (real instruments or simulated bench)
//! - Summarizing a saved result file
//! - Printing or writing the effective configuration
//!
//! # Usage
//!
//! Run a simulated three-cycle sweep and save it:
//! ```bash
//! laser-sweep run --simulate --cycles 3 --output ring_resonator
//! ```
//!
//! Inspect a result:
//! ```bash
//! laser-sweep show ring_resonator.txt
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use laser_sweep::config::{AppConfig, InstrumentKind, DEFAULT_CONFIG_PATH};
use laser_sweep::hardware::{Bench, SimClock};
use laser_sweep::logging;
use laser_sweep::presentation::{CycleSummary, Presenter, TracingPresenter};
use laser_sweep::storage::result_file;
use laser_sweep::sweep::{runner, stop_channel, Cycle, SweepController};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "laser-sweep")]
#[command(about = "Tunable-laser sweep with synchronized power meter acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep measurement until done or Ctrl-C
    Run {
        /// Use the simulated laser and power meter
        #[arg(long)]
        simulate: bool,

        /// Number of sweep cycles
        #[arg(long)]
        cycles: Option<u32>,

        /// Save the result under this name (".txt" is appended when missing).
        /// Relative names land in the last used directory
        #[arg(long)]
        output: Option<String>,

        /// Result file to load as previous session for comparison.
        /// Relative paths are looked up in the last used directory
        #[arg(long)]
        keep_previous: Option<PathBuf>,
    },

    /// Summarize a result file
    Show {
        /// Tab-separated result file
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Write it to this file instead
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            simulate,
            cycles,
            output,
            keep_previous,
        } => {
            run_measurement(
                config,
                &config_path,
                simulate,
                cycles,
                output,
                keep_previous,
            )
            .await
        }
        Commands::Show { file } => show_result(&file),
        Commands::Config { write } => show_config(&config, write),
    }
}

async fn run_measurement(
    mut config: AppConfig,
    config_path: &Path,
    simulate: bool,
    cycles: Option<u32>,
    output: Option<String>,
    keep_previous: Option<PathBuf>,
) -> Result<()> {
    if simulate {
        config.instruments.laser.kind = InstrumentKind::Simulated;
        config.instruments.power_meter.kind = InstrumentKind::Simulated;
    }
    if let Some(cycles) = cycles {
        config.sweep.cycles = cycles;
    }
    config.validate()?;

    let clock = SimClock::wall();
    let bench = Bench::connect(&config.instruments, &config.sweep, clock.clone()).await;

    let presenter = Arc::new(TracingPresenter::new().with_legend(config.run.legend));
    presenter.status(&bench.status());

    let mut controller = SweepController::new(
        bench.laser.clone(),
        bench.power_meter.clone(),
        presenter,
    )
    .with_run_config(config.run.clone())
    .with_recovery_file(&config.storage.recovery_file);

    if let Some(path) = keep_previous {
        let path = result_file::resolve_in_last_dir(path, &config.storage);
        let loaded = controller
            .load_previous(&path)
            .with_context(|| format!("Failed to load previous session {}", path.display()))?;
        info!(cycles = loaded, path = %path.display(), "Previous session loaded");
        remember_dir(&mut config, &path);
    }

    controller.start_sweep(config.sweep.clone(), clock.now()).await?;

    let (handle, signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    let state = runner::run(&mut controller, &clock, config.sweep.poll_interval, signal).await;
    println!("Measurement {}", state);
    for cycle in controller.session().cycles() {
        print_cycle(cycle);
    }

    if let Some(name) = output {
        let path = result_file::save(controller.session(), &name, &config.storage)?;
        println!("Saved {}", path.display());
        remember_dir(&mut config, &path);
    }

    // Remember the last directory only in a configuration file the user already has
    if config_path.exists() {
        if let Err(e) = config.save(config_path) {
            error!(error = %e, "Could not update configuration file");
        }
    }
    Ok(())
}

/// Record the directory of `file` as the starting point for later relative names
fn remember_dir(config: &mut AppConfig, file: &Path) {
    if let Some(dir) = file.parent().filter(|d| !d.as_os_str().is_empty()) {
        config.storage.last_dir = Some(dir.to_path_buf());
    }
}

fn show_result(file: &Path) -> Result<()> {
    let cycles = result_file::load(file)
        .with_context(|| format!("Failed to load {}", file.display()))?;
    println!("{}: {} cycle(s)", file.display(), cycles.len());
    for cycle in &cycles {
        print_cycle(cycle);
    }
    Ok(())
}

fn print_cycle(cycle: &Cycle) {
    let summary = CycleSummary::of(cycle);
    let peak = match (summary.peak_power_dbm, summary.peak_wavelength_nm) {
        (Some(dbm), Some(nm)) => format!("peak {:.2} dBm at {:.4} nm", dbm, nm),
        (Some(dbm), None) => format!("peak {:.2} dBm", dbm),
        _ => "no samples".to_string(),
    };
    println!(
        "  Cycle {}: {} samples, {:.4} -> {:.4} nm, {}{}",
        summary.index + 1,
        summary.samples,
        summary.launch_nm,
        summary.stop_nm,
        peak,
        if summary.degraded_readings > 0 {
            format!(" ({} degraded readings)", summary.degraded_readings)
        } else {
            String::new()
        }
    );
}

fn show_config(config: &AppConfig, write: Option<PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
