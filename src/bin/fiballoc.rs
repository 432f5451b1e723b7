//! FibAlloc command-line tool
//!
//! Inspects the Fibonacci size table and replays allocation scripts against a
//! configured pool.
//!
//! # Examples
//!
//! ```bash
//! # Block sizes of the first 20 levels
//! fiballoc sizes --up-to 20
//!
//! # Which level serves a 3000-unit request
//! fiballoc level 3000
//!
//! # Replay a recorded sequence with a pool from fiballoc.toml
//! fiballoc replay trace.json --config fiballoc.toml --json
//! ```

use clap::{Parser, Subcommand};
use fiballoc::alloc::{level_for_at_least, level_for_at_most, size, MAX_LEVEL};
use fiballoc::replay::{Outcome, ReplayReport};
use fiballoc::{FibAlloc, FibAllocConfig, Replayer, Script};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// FibAlloc - Fibonacci buddy allocator
#[derive(Parser, Debug)]
#[command(name = "fiballoc")]
#[command(version = fiballoc::VERSION)]
#[command(about = "Fibonacci buddy allocator tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs to daily rolling files in this directory
    #[arg(long, global = true, env = "FIBALLOC_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the block size of every level
    Sizes {
        /// Last level to print
        #[arg(long, default_value_t = MAX_LEVEL)]
        up_to: usize,
    },

    /// Show the levels that fit a request size
    Level {
        /// Request size in units
        size: u64,
    },

    /// Replay an allocation script
    Replay {
        /// JSON script file
        script: PathBuf,

        /// Allocator configuration file (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics after the report
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective allocator configuration
    Config {
        /// Allocator configuration file (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    match cli.command {
        Commands::Sizes { up_to } => sizes_command(up_to),
        Commands::Level { size } => level_command(size),
        Commands::Replay {
            script,
            config,
            json,
            metrics,
        } => replay_command(script, config, json, metrics),
        Commands::Config { config } => config_command(config),
    }
}

/// Setup logging on stderr and optionally to rolling files
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, "fiballoc.log");
            Some(fmt::layer().with_writer(file_appender).with_ansi(false))
        }
        None => None,
    };

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    // Reports go to stdout, so logs stay on stderr
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn sizes_command(up_to: usize) -> anyhow::Result<()> {
    if up_to > MAX_LEVEL {
        anyhow::bail!("level {} exceeds the maximum of {}", up_to, MAX_LEVEL);
    }
    println!("{:>5}  {:>22}", "LEVEL", "SIZE");
    for level in 0..=up_to {
        println!("{:>5}  {:>22}", level, size(level));
    }
    Ok(())
}

fn level_command(request: u64) -> anyhow::Result<()> {
    match level_for_at_least(request) {
        Some(level) => println!(
            "smallest block holding {}: level {} ({} units)",
            request,
            level,
            size(level)
        ),
        None => println!("no level holds {} units", request),
    }
    match level_for_at_most(request) {
        Some(level) => println!(
            "largest block within {}: level {} ({} units)",
            request,
            level,
            size(level)
        ),
        None => println!("no block fits within {} units", request),
    }
    Ok(())
}

fn replay_command(
    script_path: PathBuf,
    config_path: Option<PathBuf>,
    json: bool,
    metrics: bool,
) -> anyhow::Result<()> {
    let config = FibAllocConfig::load(config_path.as_deref())?;
    let mut allocator = FibAlloc::from_config(&config)?;
    let script = Script::load(&script_path)?;
    info!(script = %script_path.display(), "Loaded script");

    let mut replayer = Replayer::new(&mut allocator);
    if metrics {
        replayer = replayer.with_metrics();
    }
    let report = replayer.run(&script)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if metrics {
        print!("{}", fiballoc::metrics::export_metrics()?);
    }

    allocator.shutdown();
    Ok(())
}

fn print_report(report: &ReplayReport) {
    for (index, outcome) in report.outcomes.iter().enumerate() {
        match outcome {
            Outcome::Allocated { name, allocation } => {
                println!("{:>4}  alloc  {:<16} {}", index, name, allocation)
            }
            Outcome::Exhausted { name, minimum } => {
                println!("{:>4}  alloc  {:<16} exhausted (minimum {})", index, name, minimum)
            }
            Outcome::Freed { name, allocation } => {
                println!("{:>4}  free   {:<16} {}", index, name, allocation)
            }
            Outcome::Verified => println!("{:>4}  verify ok", index),
        }
    }

    let stats = &report.stats;
    println!();
    println!("allocator:     {}", stats.label);
    println!("capacity:      {} (level {})", stats.capacity, stats.largest_level);
    println!(
        "allocated:     {} units in {} blocks ({:.1}%)",
        stats.allocated_units,
        stats.allocation_count,
        stats.utilization() * 100.0
    );
    println!("largest free:  {}", stats.largest_free_block);
    println!("fragmentation: {:.3}", stats.fragmentation());
    println!(
        "nodes:         {} live, {} recycled",
        stats.live_nodes, stats.recycled_nodes
    );
    println!("exhausted:     {}", report.exhausted_count());
}

fn config_command(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = FibAllocConfig::load(config_path.as_deref())?;
    let level = config.resolve_largest_level()?;
    print!("{}", config.to_toml()?);
    println!("# resolved: level {} ({} units)", level, size(level));
    Ok(())
}
