//! flowsim -- headless runner for production-flow simulations.
//!
//! ```text
//! flowsim run plant.ron --ticks 500 --seed 7 --report reports.jsonl \
//!     --telemetry log.jsonl --snapshot end.bin --check-determinism
//! flowsim validate plant.toml
//! ```
//!
//! Logging goes to stderr. `RUST_LOG` takes precedence over `--log-level`.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use flowsim_core::config::EngineConfig;
use flowsim_core::engine::Engine;
use flowsim_core::sim::TickReport;
use flowsim_core::validation::validate_determinism;
use flowsim_data::loader::load_layout;
use flowsim_data::store::FileStore;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flowsim")]
#[command(version, about = "Tick-based production-flow simulator", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a plant layout for a number of ticks and print a summary
    Run(RunArgs),
    /// Load a layout, resolve every reference and report what it contains
    Validate {
        /// Layout file (.ron, .json or .toml)
        layout: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Layout file (.ron, .json or .toml)
    layout: PathBuf,

    /// Number of ticks to run
    #[arg(short, long, default_value_t = 100)]
    ticks: u64,

    /// Override the layout's failure-sampling seed
    #[arg(long)]
    seed: Option<u64>,

    /// Append each tick report to this file as JSON lines
    #[arg(long)]
    report: Option<PathBuf>,

    /// Append telemetry entries to this file as JSON lines
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Write a binary engine snapshot here after the last tick
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Run the layout twice more and compare per-tick hashes and telemetry
    #[arg(long)]
    check_determinism: bool,

    /// Run partitions one after another even in a `parallel` build
    #[arg(long)]
    serial: bool,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Validate { layout } => validate(layout),
    }
}

fn validate(path: PathBuf) -> Result<()> {
    let layout = load_layout(&path).with_context(|| format!("loading {}", path.display()))?;
    let config = layout.engine.clone().unwrap_or_default();
    let (engine, names) = Engine::from_layout(&layout, config)
        .with_context(|| format!("resolving {}", path.display()))?;
    println!(
        "{}: {} materials, {} recipes, {} steps, {} transports, {} sensors, {} orders, {} resources, {} partitions",
        path.display(),
        engine.registry().material_count(),
        engine.registry().recipe_count(),
        names.steps.len(),
        names.transports.len(),
        names.sensors.len(),
        names.orders.len(),
        names.resources.len(),
        engine.partitions().len(),
    );
    Ok(())
}

fn run(args: RunArgs) -> Result<()> {
    let layout = load_layout(&args.layout)
        .with_context(|| format!("loading {}", args.layout.display()))?;
    let mut config: EngineConfig = layout.engine.clone().unwrap_or_default();
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.serial {
        config.parallel = false;
    }

    let (mut engine, _) = Engine::from_layout(&layout, config.clone())
        .with_context(|| format!("resolving {}", args.layout.display()))?;

    if args.report.is_some() || args.telemetry.is_some() {
        let mut store = FileStore::open(&args.layout)?;
        if let Some(path) = &args.report {
            store = store
                .with_report_file(path)
                .with_context(|| format!("opening {}", path.display()))?;
        }
        if let Some(path) = &args.telemetry {
            store = store
                .with_telemetry_file(path)
                .with_context(|| format!("opening {}", path.display()))?;
        }
        engine.attach_persistence(Box::new(store));
    }

    info!(ticks = args.ticks, seed = config.seed, "running");
    let reports = engine.run(args.ticks).context("simulation aborted")?;
    print_summary(&engine, &reports);

    if let Some(path) = &args.snapshot {
        let data = engine.serialize()?;
        std::fs::write(path, &data).with_context(|| format!("writing {}", path.display()))?;
        info!(bytes = data.len(), path = %path.display(), "snapshot written");
    }

    if args.check_determinism {
        let result = validate_determinism(&layout, config, args.ticks)?;
        if !result.is_deterministic {
            warn!(divergences = ?result.divergences, "runs diverged");
            bail!(
                "runs diverged at tick {}",
                result.divergence_tick.unwrap_or_default()
            );
        }
        println!("determinism: {} ticks matched", result.hash_log.len());
    }
    Ok(())
}

fn print_summary(engine: &Engine, reports: &[TickReport]) {
    println!("tick {}  state hash {:016x}", engine.tick(), engine.state_hash());

    println!("\nprocess steps");
    for s in engine.snapshot_all_steps() {
        println!(
            "  {:<20} {:<8} recipe={:<12} produced={:<6} failed={:<4} held={}/{}",
            s.name,
            s.status.as_str(),
            s.recipe.as_deref().unwrap_or("-"),
            s.units_produced,
            s.cycles_failed,
            s.inventory.total(),
            s.inventory.limit,
        );
    }

    println!("\ntransport systems");
    for t in engine.snapshot_all_transports() {
        println!(
            "  {:<20} {:<8} in_transit={:<4} picked={:<6} delivered={:<6} exported={}",
            t.name,
            t.status.as_str(),
            t.in_transit,
            t.picked_up,
            t.delivered,
            t.exported,
        );
    }

    let orders = engine.snapshot_all_orders();
    if !orders.is_empty() {
        println!("\norders");
        for o in orders {
            let tick = |t: Option<u64>| t.map_or_else(|| "-".to_string(), |t| t.to_string());
            println!(
                "  {:<20} {:<10} {}/{} {:<8} started={} completed={}{}",
                o.name.as_deref().unwrap_or("-"),
                format!("{:?}", o.status).to_lowercase(),
                o.produced,
                o.quantity,
                o.material,
                tick(o.started_tick),
                tick(o.completed_tick),
                if o.overdue { " overdue" } else { "" },
            );
        }
    }

    let ledger = engine.ledger();
    println!(
        "\nledger  entered={} produced={} consumed={} scrapped={} exported={} held={}",
        ledger.entered,
        ledger.produced,
        ledger.consumed,
        ledger.scrapped,
        ledger.exported,
        engine.held(),
    );

    let unit_failures: usize = reports.iter().map(|r| r.errors.len()).sum();
    let command_failures: usize = reports.iter().map(|r| r.command_failures.len()).sum();
    let dropped: u64 = reports.iter().map(|r| r.log_failures).sum();
    println!(
        "log     entries={} dropped={}  unit failures={}  rejected commands={}",
        engine.log().len(),
        dropped,
        unit_failures,
        command_failures,
    );
}
