//! Escrow Simulator CLI
//!
//! Replays a scripted or seeded-random scenario against an in-memory escrow
//! and prints the resulting report (steps, events, final snapshot, balances,
//! custody check) as JSON on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin escrow-sim -- --config demos/escrow.toml check
//! cargo run --bin escrow-sim -- --config demos/escrow.toml run --scenario demos/scenario.toml
//! cargo run --bin escrow-sim -- --config demos/escrow.toml random --seed 42 --accounts 6
//! ```
//!
//! Every config field can be overridden with `ESCROW_*` variables (a `.env`
//! file in the working directory is honored).
//!
//! # Exit Codes
//!
//! - 0: Scenario completed and custody matches pool totals
//! - 1: Scenario completed but custody diverged
//! - 2: Configuration or scenario error

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use threshold_escrow::escrow::{
    EscrowConfig, EscrowConfigFile, Scenario, ScenarioReport, ScenarioRunner,
};

#[derive(Parser, Debug)]
#[command(name = "escrow-sim")]
#[command(about = "Replay threshold escrow scenarios against in-memory assets")]
struct Args {
    /// Escrow config (TOML)
    #[arg(long, env = "ESCROW_CONFIG", default_value = "escrow.toml")]
    config: PathBuf,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the config and print its summary
    Check,

    /// Replay a scenario file
    Run {
        #[arg(long)]
        scenario: PathBuf,
    },

    /// Generate and replay a seeded random round
    Random {
        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(long, default_value = "4")]
        accounts: usize,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("threshold_escrow={level},escrow_sim={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<EscrowConfig> {
    let mut file = EscrowConfigFile::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    file.apply_env_overrides();
    let config = file.into_config()?;
    info!("config: {}", config.summary());
    Ok(config)
}

/// Returns whether custody balanced at the end of the run.
fn run(args: &Args) -> Result<bool> {
    let config = load_config(&args.config)?;

    let report = match &args.command {
        Commands::Check => {
            println!("{}", config.summary());
            return Ok(true);
        }
        Commands::Run { scenario } => {
            let scenario = Scenario::load(scenario)?;
            ScenarioRunner::run(config, &scenario)?
        }
        Commands::Random { seed, accounts } => {
            let scenario = Scenario::random(*seed, &config, *accounts);
            info!(seed, accounts, steps = scenario.steps.len(), "generated random scenario");
            ScenarioRunner::run(config, &scenario)?
        }
    };

    write_report(&report, args.output.as_deref())?;

    if !report.conservation.balanced {
        error!(
            held_a = report.conservation.held_a,
            deposits_a = report.conservation.deposits_a,
            held_b = report.conservation.held_b,
            deposits_b = report.conservation.deposits_b,
            "escrow custody diverged from pool totals"
        );
    }
    Ok(report.conservation.balanced)
}

fn write_report(report: &ScenarioReport, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, report)?;
            writer.flush()?;
            info!(path = %path.display(), "report written");
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, report)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}
