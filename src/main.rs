use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::prelude::*;

use herald::config::SimConfig;
use herald::error::HeraldResult;
use herald::scenario::{LinkScenario, RunSummary, TeleportScenario};
use herald::simulation::Simulation;
use herald::substrate::RandomSubstrate;

#[derive(Parser)]
#[command(name = "herald")]
#[command(version)]
#[command(about = "Deterministic simulation of heralded entanglement and teleportation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate entanglement over a heralded midpoint link
    Link(RunArgs),

    /// Teleport a prepared state using pairs from a midpoint source
    Teleport(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON configuration file; missing fields take the scenario defaults
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Attempt periods (link) or source cycles (teleport) to simulate
    #[arg(short, long)]
    rounds: Option<u64>,

    /// Seed for the random substrate
    #[arg(short, long)]
    seed: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Write the event trace as JSON lines
    #[arg(long, value_name = "PATH")]
    trace: Option<PathBuf>,
}

impl RunArgs {
    fn load(&self, defaults: SimConfig) -> HeraldResult<SimConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let overrides: serde_json::Value = serde_json::from_str(&text)?;
                merge(defaults, overrides)?
            }
            None => defaults,
        };
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Overlay the fields present in `overrides` onto `base`.
fn merge(base: SimConfig, overrides: serde_json::Value) -> HeraldResult<SimConfig> {
    let mut value = serde_json::to_value(base)?;
    if let (Some(target), serde_json::Value::Object(fields)) = (value.as_object_mut(), overrides) {
        for (key, field) in fields {
            target.insert(key, field);
        }
    }
    Ok(serde_json::from_value(value)?)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "herald=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Link(args) => run_link(args),
        Command::Teleport(args) => run_teleport(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_link(args: &RunArgs) -> HeraldResult<()> {
    let config = args.load(SimConfig::link_defaults())?;
    let mut scenario = LinkScenario::build(&config, Box::new(RandomSubstrate::new(config.seed)))?;
    if args.trace.is_some() {
        scenario.sim.enable_trace();
    }
    let summary = scenario.run()?;
    report(args, &config, &summary, &scenario.sim)
}

fn run_teleport(args: &RunArgs) -> HeraldResult<()> {
    let config = args.load(SimConfig::teleport_defaults())?;
    let mut scenario = TeleportScenario::build(&config, Box::new(RandomSubstrate::new(config.seed)))?;
    if args.trace.is_some() {
        scenario.sim.enable_trace();
    }
    let summary = scenario.run()?;
    report(args, &config, &summary, &scenario.sim)
}

fn report(args: &RunArgs, config: &SimConfig, summary: &RunSummary, sim: &Simulation) -> HeraldResult<()> {
    if let Some(path) = &args.trace {
        write_trace(path, sim)?;
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }
    println!("═══════════════════════════════════════════════════════");
    println!("  herald: {} ({} rounds, seed {})", summary.scenario, config.rounds, config.seed);
    println!("═══════════════════════════════════════════════════════");
    println!("{}", summary);
    Ok(())
}

fn write_trace(path: &Path, sim: &Simulation) -> HeraldResult<()> {
    let Some(trace) = sim.trace() else {
        return Ok(());
    };
    std::fs::write(path, trace.to_json_lines()?)?;
    Ok(())
}
