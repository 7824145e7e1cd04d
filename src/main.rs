//! streamdf - CLI

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use streamdf::demos::Demo;
use streamdf::util::config::{RuntimeConfig, ENV_CONFIG};
use streamdf::util::logger::{self, LogLevel};
use streamdf::{Runtime, VERSION};

/// Data-flow task-parallel runtime
#[derive(Parser, Debug)]
#[command(name = "streamdf")]
#[command(version = VERSION)]
#[command(about = "Data-flow task-parallel runtime with NUMA-aware work stealing", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a built-in workload and print its report
    Run {
        /// Workload: pipeline, broadcast or reduction
        #[arg(value_name = "DEMO", default_value = "pipeline")]
        demo: Demo,

        /// Number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,

        /// Rounds (or leaves, for the reduction) to generate
        #[arg(short, long, default_value_t = 1024)]
        frames: usize,

        /// TOML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// TOML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

/// Defaults, then the config file (flag or environment), then environment
/// overrides.
fn load_config(path: Option<PathBuf>) -> Result<RuntimeConfig> {
    let path = path.or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));
    let mut config = match path {
        Some(path) => RuntimeConfig::load(&path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    logger::init_with_level(if args.verbose { LogLevel::Debug } else { LogLevel::Info });

    match args.command {
        Commands::Run {
            demo,
            workers,
            frames,
            config,
            json,
        } => {
            let mut config = load_config(config)?;
            if let Some(workers) = workers {
                config.num_workers = workers;
            }
            let runtime = Runtime::new(config).context("Failed to start runtime")?;
            let run = demo
                .run(&runtime, frames)
                .with_context(|| format!("Failed to run {} demo", demo))?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&run).context("Failed to serialize report")?
                );
            } else {
                println!("{} demo, {} frames: checksum {}", demo, frames, run.checksum);
                println!("{}", run.report);
            }
            if !run.is_correct() {
                bail!(
                    "{} demo produced checksum {}, expected {}",
                    demo,
                    run.checksum,
                    run.expected
                );
            }
        },
        Commands::Config { config } => {
            let config = load_config(config)?;
            config.validate().context("Invalid configuration")?;
            print!("{}", config.to_toml().context("Failed to render configuration")?);
        },
    }

    Ok(())
}
