//! YaoXiang fiber runtime - CLI

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use yaoxiang_fiber::pipeline::{run_pipeline, PipelineOptions};
use yaoxiang_fiber::runtime::sync::Strategy;
use yaoxiang_fiber::runtime::Runtime;
use yaoxiang_fiber::util::config::load_effective_config;
use yaoxiang_fiber::util::logger::{self, LogLevel};
use yaoxiang_fiber::{NAME, VERSION};

/// Cooperative fibers, scopes and queues
#[derive(Parser, Debug)]
#[command(name = "yaoxiang-fiber")]
#[command(author = "YaoXiang Team")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the user config)
    #[arg(long, global = true, value_name = "FILE")]
    path: Option<PathBuf>,

    /// Worker threads (overrides config and environment)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run producers and consumers over a queue
    Pipeline {
        /// bounded, dropping, sliding or unbounded
        #[arg(long, default_value = "bounded")]
        strategy: Strategy,

        /// Queue capacity
        #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..))]
        capacity: u64,

        /// Producer fibers
        #[arg(long, default_value_t = 4)]
        producers: usize,

        /// Consumer fibers
        #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u64).range(1..))]
        consumers: u64,

        /// Items offered by each producer
        #[arg(long, default_value_t = 1000)]
        items: usize,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_effective_config(args.path.as_deref()).with_context(|| {
        match &args.path {
            Some(path) => format!("Failed to load config: {}", path.display()),
            None => "Failed to load user config".to_string(),
        }
    })?;
    if let Some(workers) = args.workers {
        config.scheduler.num_workers = Some(workers);
    }
    if args.verbose {
        config.logging.level = LogLevel::Debug;
    }
    logger::init_with_level(config.logging.level);

    match args.command {
        Commands::Pipeline {
            strategy,
            capacity,
            producers,
            consumers,
            items,
            json,
        } => {
            let runtime = Runtime::from_config(&config);
            let options = PipelineOptions {
                strategy,
                capacity: capacity as usize,
                producers,
                consumers: consumers as usize,
                items_per_producer: items,
            };
            let report = run_pipeline(&runtime, &options)
                .map_err(|cause| anyhow!("pipeline failed: {}", cause))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("strategy:   {} (capacity {})", report.strategy, report.capacity);
                println!("offered:    {}", report.offered);
                println!("accepted:   {}", report.accepted);
                println!("delivered:  {}", report.delivered);
                println!("consumers:  {:?}", report.per_consumer);
                println!(
                    "fibers:     {} forked, {} completed, {} turns",
                    report.stats.fibers_forked, report.stats.fibers_completed, report.stats.turns
                );
            }
            runtime.shutdown();
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
