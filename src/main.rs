//! txprop - runs transaction propagation scenarios against an in-memory database

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;
use txprop::config::CoordinatorConfig;
use txprop::scenario::{self, ScenarioReport};

/// txprop - Transaction propagation playground
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Coordinator config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disallow NESTED propagation
    #[arg(long, global = true)]
    no_nested: bool,

    /// Fail participant commits into a rollback-only transaction immediately
    #[arg(long, global = true)]
    fail_early: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: Format,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// List available scenarios
    List,
    /// Run one or more scenarios
    Run {
        /// Scenario names
        names: Vec<String>,

        /// Run every scenario
        #[arg(short, long)]
        all: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Text,
    Json,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = load_config(&args)?;
    info!("Coordinator config: {:?}", config);

    match &args.command {
        Command::List => {
            for s in scenario::all() {
                println!("{:<30} {}", s.name, s.description);
            }
        }
        Command::Run { names, all } => {
            let selected = if *all {
                scenario::all().iter().collect::<Vec<_>>()
            } else {
                if names.is_empty() {
                    bail!("No scenario given; pass names or --all (see `txprop list`)");
                }
                names
                    .iter()
                    .map(|n| {
                        scenario::find(n).with_context(|| format!("Unknown scenario '{}'", n))
                    })
                    .collect::<Result<Vec<_>>>()?
            };

            let reports: Vec<ScenarioReport> =
                selected.iter().map(|s| s.run(&config)).collect();
            print_reports(&reports, args.format)?;
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };
    if args.no_nested {
        config.nested_transaction_allowed = false;
    }
    if args.fail_early {
        config.fail_early_on_global_rollback_only = true;
    }
    Ok(config)
}

fn print_reports(reports: &[ScenarioReport], format: Format) -> Result<()> {
    match format {
        Format::Text => {
            for report in reports {
                println!("{}", report);
            }
        }
        Format::Json => {
            let json =
                serde_json::to_string_pretty(reports).context("Failed to serialize reports")?;
            println!("{}", json);
        }
    }
    Ok(())
}
