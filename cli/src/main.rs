//! `phase-scheduler` - run a benchmark against the in-process simulated engine
//!
//! ```text
//! phase-scheduler run bench.json --tick-ms 10 --session-ms 200
//! phase-scheduler describe bench.json
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).
//! The final run snapshot is printed to stdout as JSON.

use clap::{Parser, Subcommand};
use phase_scheduler_core::resources::ResourcePools;
use phase_scheduler_core::{
    BenchmarkConfig, BenchmarkDefinitionError, DependencyGraph, RunStatus, Scheduler,
    SchedulerConfig, SchedulerError, SimulatedEngine,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "phase-scheduler", version, about = "Phase scheduler for load generation benchmarks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a benchmark to completion and print the final snapshot
    Run {
        #[arg(value_name = "BENCHMARK")]
        benchmark: PathBuf,

        /// Milliseconds of run time per tick
        #[arg(long = "tick-ms", default_value_t = 10)]
        tick_ms: u64,

        /// Seed for phases sampled with variance
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// How long every simulated session lasts
        #[arg(long = "session-ms", default_value_t = 100)]
        session_ms: u64,

        /// Fail every n-th simulated session
        #[arg(long = "fail-every", value_name = "N")]
        fail_every: Option<u64>,

        /// How long stopped phases may take to drain
        #[arg(long = "drain-timeout-ms", default_value_t = 5_000)]
        drain_timeout_ms: u64,

        /// Phase whose failure does not fail the run (repeatable)
        #[arg(long = "non-critical", value_name = "PHASE")]
        non_critical: Vec<String>,

        /// Give up after this many ticks
        #[arg(long = "max-ticks", default_value_t = 1_000_000)]
        max_ticks: u64,

        /// Sleep one tick interval between ticks
        #[arg(long, default_value_t = false)]
        realtime: bool,
    },

    /// Print the load model of every phase
    Describe {
        #[arg(value_name = "BENCHMARK")]
        benchmark: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Definition(#[from] BenchmarkDefinitionError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("cannot encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            benchmark,
            tick_ms,
            seed,
            session_ms,
            fail_every,
            drain_timeout_ms,
            non_critical,
            max_ticks,
            realtime,
        } => {
            let config = SchedulerConfig {
                tick_interval_ms: tick_ms,
                rng_seed: seed,
                drain_timeout_ms,
                non_critical_phases: non_critical,
            };
            run(&benchmark, config, session_ms, fail_every, max_ticks, realtime)
        }
        Command::Describe { benchmark } => describe(&benchmark).map(|_| RunStatus::Completed),
    };

    match result {
        Ok(RunStatus::Completed) => ExitCode::SUCCESS,
        Ok(status) => {
            warn!(?status, "Run did not complete");
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

fn load(path: &Path) -> Result<BenchmarkConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BenchmarkConfig::from_json_str(&text)?)
}

fn run(
    path: &Path,
    config: SchedulerConfig,
    session_ms: u64,
    fail_every: Option<u64>,
    max_ticks: u64,
    realtime: bool,
) -> Result<RunStatus, CliError> {
    let benchmark = load(path)?.build()?;
    let tick_interval = Duration::from_millis(config.tick_interval_ms);

    let mut scheduler = Scheduler::new(benchmark, config, |events| {
        let engine = SimulatedEngine::new(events, session_ms);
        match fail_every {
            Some(n) => engine.with_failure_every(n),
            None => engine,
        }
    })?;
    let run_id = scheduler.start()?;
    info!(%run_id, path = %path.display(), "Running benchmark");

    let mut ticks = 0;
    while ticks < max_ticks {
        let result = scheduler.tick()?;
        ticks += 1;
        if result.run_status.is_over() {
            break;
        }
        if realtime {
            std::thread::sleep(tick_interval);
        }
    }

    let snapshot = scheduler.snapshot();
    println!("{}", snapshot.to_json()?);
    Ok(snapshot.status)
}

fn describe(path: &Path) -> Result<(), CliError> {
    let benchmark = load(path)?.build()?;
    let graph = DependencyGraph::build(&benchmark)?;
    ResourcePools::reserve(&benchmark)?;

    println!("{} ({} agents)", benchmark.name(), benchmark.agent_count());
    for phase in benchmark.phases() {
        println!(
            "  {:<24} {:<16} {}",
            phase.name(),
            phase.kind().name(),
            phase.description(benchmark.agent_count())
        );
        let after: Vec<&str> = graph
            .start_after(phase.id())
            .iter()
            .chain(graph.start_after_strict(phase.id()))
            .filter_map(|id| benchmark.phase(*id).map(|p| p.name()))
            .collect();
        if !after.is_empty() {
            println!("  {:<24} after {}", "", after.join(", "));
        }
    }
    Ok(())
}
