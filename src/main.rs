use anyhow::{Context, Result};
use clap::Parser;
use dpd_sim::config::SimConfig;
use dpd_sim::io::{load_snapshot, save_snapshot};
use dpd_sim::simulation::Simulation;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "dpd_sim")]
#[command(about = "Run a Dissipative Particle Dynamics simulation from a TOML configuration")]
struct Args {
    /// Simulation configuration (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Continue from a snapshot instead of building a fresh system
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Number of steps; overrides run.steps
    #[arg(long)]
    steps: Option<u64>,

    /// Worker tasks; overrides parallel.tasks
    #[arg(long)]
    tasks: Option<usize>,

    /// Final snapshot (.bin, .bin.gz, .json or .json.gz)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = SimConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration {}", args.config.display()))?;
    if let Some(tasks) = args.tasks {
        config.parallel.tasks = tasks;
    }
    let steps = args.steps.unwrap_or(config.run.steps);

    let mut sim = match &args.restore {
        Some(path) => {
            let snapshot =
                load_snapshot(path).with_context(|| format!("failed to restore {}", path.display()))?;
            Simulation::from_snapshot(config, snapshot).context("failed to assemble restored system")?
        }
        None => Simulation::from_config(config).context("failed to assemble system")?,
    };

    let start = Instant::now();
    let properties = sim
        .run(steps)
        .with_context(|| format!("run stopped after step {}", sim.step_count()))?;
    log::info!("{} steps in {:.2?}", steps, start.elapsed());

    if let Some(path) = &args.output {
        save_snapshot(path, &sim.snapshot())
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    }
    println!("{}", serde_json::to_string_pretty(&properties)?);

    sim.shutdown();

    #[cfg(feature = "profiling")]
    dpd_sim::PROFILER.lock().log_and_clear();

    Ok(())
}
