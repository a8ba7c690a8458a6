//! Command-line driver: load a TOML run file, set up logging and the thread
//! pool, run the simulation, write the outputs.
//!
//! Exits with code 0 on success and 1 on a fatal error, after printing a
//! single-line diagnostic.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lumiray::config::SimulationConfig;
use lumiray::Simulation;

/// Monte Carlo radiative transfer simulations.
#[derive(Parser, Debug)]
#[command(name = "lumiray", version, about)]
struct Args {
  /// Path to the TOML run file.
  run_file: PathBuf,

  /// Override the number of worker threads.
  #[arg(long)]
  threads: Option<usize>,

  /// Override the base random seed.
  #[arg(long)]
  seed: Option<u64>,
}

fn run(args: Args) -> anyhow::Result<()> {
  let text = std::fs::read_to_string(&args.run_file)
    .with_context(|| format!("can't read run file {}", args.run_file.display()))?;
  let mut config: SimulationConfig =
    toml::from_str(&text).with_context(|| format!("can't parse run file {}", args.run_file.display()))?;

  if let Some(seed) = args.seed {
    config.seed = seed;
  }
  if let Some(threads) = args.threads.or(config.threads) {
    rayon::ThreadPoolBuilder::new()
      .num_threads(threads)
      .build_global()
      .context("can't configure the thread pool")?;
  }
  info!(
    threads = rayon::current_num_threads(),
    run_file = %args.run_file.display(),
    "starting simulation"
  );

  let simulation = Simulation::build(config)?;
  simulation.run()?;
  Ok(())
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  match run(Args::parse()) {
    Ok(()) => ExitCode::SUCCESS,
    Err(error) => {
      eprintln!("error: {error:#}");
      ExitCode::FAILURE
    }
  }
}
