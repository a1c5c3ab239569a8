//! CLI entry point for daq-grabber
//!
//! # Usage
//!
//! Acquire from every source in a config file for ten seconds, printing
//! drained records as JSON and saving everything to a snapshot:
//! ```bash
//! daq-grabber run --config config/grabber.toml --duration-ms 10000 --json --output run.snap
//! ```
//!
//! List driver types, or summarize a saved snapshot:
//! ```bash
//! daq-grabber drivers
//! daq-grabber inspect run.snap
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use daq_grabber::config::{GrabberConfig, DEFAULT_CONFIG_PATH};
use daq_grabber::gateway::{DrainedBatch, HostConverter, JsonConverter};
use daq_grabber::logging::{self, OutputFormat, TracingConfig};
use daq_grabber::manager::{AcquisitionManager, ShutdownReport};
use daq_grabber::observation::Observation;
use daq_grabber::persistence;
use daq_grabber::source::SourceRegistry;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "daq-grabber", version)]
#[command(about = "Multi-source polling data acquisition", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run acquisition from a config file
    Run(RunArgs),

    /// List registered driver types
    Drivers,

    /// Summarize a saved observation snapshot
    Inspect {
        /// Snapshot file written by `run --output`
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Grabber TOML config
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Stop each generation after this long (default: until Ctrl-C)
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Interval between drains
    #[arg(long, default_value_t = 500)]
    drain_interval_ms: u64,

    /// Number of start/stop generations to run
    #[arg(long, default_value_t = 1)]
    cycles: u32,

    /// Save every drained record to this snapshot file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print drained records as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormat> for OutputFormat {
    fn from(value: LogFormat) -> Self {
        match value {
            LogFormat::Pretty => OutputFormat::Pretty,
            LogFormat::Compact => OutputFormat::Compact,
            LogFormat::Json => OutputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Elapsed,
    Interrupted,
    WorkerFault,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.log_format);

    match cli.command {
        Commands::Run(args) => run(args, format),
        Commands::Drivers => {
            init_logging(TracingConfig::new(Level::INFO).with_format(format))?;
            list_drivers();
            Ok(())
        }
        Commands::Inspect { path } => {
            init_logging(TracingConfig::new(Level::INFO).with_format(format))?;
            inspect(path)
        }
    }
}

fn init_logging(config: TracingConfig) -> Result<()> {
    logging::init(config).map_err(anyhow::Error::msg)
}

fn list_drivers() {
    let registry = SourceRegistry::with_mock_drivers();
    for factory in registry.factories() {
        println!("{:<16} {}", factory.driver_type, factory.name);
    }
}

fn inspect(path: PathBuf) -> Result<()> {
    let records = persistence::load_snapshot(&path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    println!("{}: {} records", path.display(), records.len());

    let mut by_label: BTreeMap<&str, Vec<&Observation>> = BTreeMap::new();
    for record in &records {
        by_label.entry(record.label.as_str()).or_default().push(record);
    }
    for (label, group) in by_label {
        let first = group.first().map(|o| o.timestamp.to_rfc3339());
        let last = group.last().map(|o| o.timestamp.to_rfc3339());
        println!(
            "  {label:<16} {:>6} records  {} .. {}",
            group.len(),
            first.unwrap_or_default(),
            last.unwrap_or_default()
        );
    }
    Ok(())
}

fn run(args: RunArgs, format: OutputFormat) -> Result<()> {
    let config = GrabberConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate()?;

    let tracing_config = TracingConfig::from_config(&config).map_err(anyhow::Error::msg)?;
    init_logging(tracing_config.with_format(format))?;

    let registry = Arc::new(SourceRegistry::with_mock_drivers());
    let manager = Arc::new(AcquisitionManager::new(config.manager_settings(), registry));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut collected: Vec<Observation> = Vec::new();
    for cycle in 1..=args.cycles.max(1) {
        info!(cycle, cycles = args.cycles, "Starting generation");
        let reason = runtime.block_on(run_generation(&manager, &config, &args, &mut collected))?;
        if reason == StopReason::Interrupted {
            info!("Interrupted, not starting further generations");
            break;
        }
    }

    let leftover = manager.store().drain_all();
    if !leftover.is_empty() {
        info!(records = leftover.len(), "Draining records left in the store");
        emit(&DrainedBatch { records: leftover, remaining: 0 }, &args, &mut collected);
    }

    if let Some(path) = &args.output {
        persistence::save_snapshot(path, &collected)?;
        info!(path = %path.display(), records = collected.len(), "Saved snapshot");
    }
    Ok(())
}

async fn run_generation(
    manager: &Arc<AcquisitionManager>,
    config: &GrabberConfig,
    args: &RunArgs,
    collected: &mut Vec<Observation>,
) -> Result<StopReason> {
    let sources = config.source_configs();
    let stagger = config.global.stagger();
    let starter = Arc::clone(manager);
    match tokio::task::spawn_blocking(move || starter.start(sources, stagger)).await? {
        Ok(summary) => info!(
            generation = summary.generation,
            spawned = summary.spawned.len(),
            skipped = summary.skipped.len(),
            "Acquisition running"
        ),
        Err(err) if err.has_running_workers() => warn!(error = %err, "Some sources were rejected"),
        Err(err) => return Err(err.into()),
    }

    let mut drain_tick = tokio::time::interval(Duration::from_millis(args.drain_interval_ms.max(1)));
    drain_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = tokio::time::sleep(Duration::from_millis(args.duration_ms.unwrap_or(0)));
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let reason = loop {
        tokio::select! {
            _ = &mut deadline, if args.duration_ms.is_some() => break StopReason::Elapsed,
            result = &mut ctrl_c => {
                result.context("listening for Ctrl-C")?;
                break StopReason::Interrupted;
            }
            _ = drain_tick.tick() => {
                emit(&manager.drain(), args, collected);
                if manager.cancellation_requested() {
                    warn!("A worker raised cancellation");
                    break StopReason::WorkerFault;
                }
            }
        }
    };

    let grace = config.global.grace_period();
    let stopper = Arc::clone(manager);
    let report = tokio::task::spawn_blocking(move || stopper.stop(grace)).await?;
    log_report(&report, reason);
    Ok(reason)
}

fn emit(batch: &DrainedBatch, args: &RunArgs, collected: &mut Vec<Observation>) {
    if batch.is_empty() {
        return;
    }
    if args.json {
        println!("{}", JsonConverter.convert(batch));
    } else {
        info!(
            drained = batch.len(),
            remaining = batch.remaining,
            sources = ?batch.counts_by_label(),
            "Drained"
        );
    }
    if args.output.is_some() {
        collected.extend(batch.records.iter().cloned());
    }
}

fn log_report(report: &ShutdownReport, reason: StopReason) {
    info!(
        reason = ?reason,
        workers = report.workers.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Generation stopped"
    );
    for worker in &report.workers {
        if worker.outcome.is_failure() {
            warn!(
                label = %worker.label,
                driver = %worker.driver,
                outcome = ?worker.outcome,
                "Worker failed"
            );
        } else {
            info!(
                label = %worker.label,
                iterations = worker.iterations,
                accepted = worker.records_accepted,
                dropped = worker.records_dropped,
                "Worker finished"
            );
        }
    }
}
