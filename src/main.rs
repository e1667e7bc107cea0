//! WolfShard - Primary/Replica Write Replication
//!
//! Command line front end: manages configuration and runs writes through
//! the replication coordinator against a simulated cluster.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfshard::config::{LoggingConfig, WolfShardConfig};
use wolfshard::replication::WriteConsistencyLevel;
use wolfshard::routing::ClusterStateSupplier;
use wolfshard::simulation::{self, SimCluster};

/// WolfShard - Primary/Replica Write Replication
#[derive(Parser)]
#[command(name = "wolfshard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfshard.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfshard.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate configuration file
    Validate,

    /// Run writes against the simulated cluster
    Simulate {
        /// Number of writes to run
        #[arg(short, long, default_value_t = 10)]
        writes: usize,

        /// Consistency for this run (one, quorum, all)
        #[arg(long)]
        consistency: Option<WriteConsistencyLevel>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output, force } => {
            init_logging(cli.log_level.as_deref(), &LoggingConfig::default());
            run_init(output, force)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref(), &LoggingConfig::default());
            run_validate(cli.config)
        }
        Commands::Simulate {
            writes,
            consistency,
        } => {
            let config = load_config(&cli.config)?;
            init_logging(cli.log_level.as_deref(), &config.logging);
            run_simulate(config, writes, consistency).await
        }
    }
}

/// Initialize logging
fn init_logging(level: Option<&str>, logging: &LoggingConfig) {
    let level = level.unwrap_or(&logging.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_config(path: &Path) -> anyhow::Result<WolfShardConfig> {
    if !path.exists() {
        return Ok(WolfShardConfig::default());
    }
    WolfShardConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Initialize configuration file
fn run_init(output: PathBuf, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", output.display());
    }

    let content = format!(
        "# WolfShard Configuration\n# Generated configuration file\n\n{}",
        WolfShardConfig::default().to_toml()?
    );
    std::fs::write(&output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Configuration file created: {}", output.display());
    println!("Then run: wolfshard --config {} simulate", output.display());
    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match WolfShardConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Write Consistency: {}", config.replication.write_consistency);
            println!("  Execute on Replicas: {}", config.replication.execute_on_replicas);
            println!(
                "  Simulation: index [{}], {} shards, {} nodes, {} replicas, {} faults",
                config.simulation.index,
                config.simulation.shards,
                config.simulation.nodes,
                config.simulation.replicas,
                config.simulation.faults.len()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}

/// Run writes through the coordinator and print each outcome
async fn run_simulate(
    config: WolfShardConfig,
    writes: usize,
    consistency: Option<WriteConsistencyLevel>,
) -> anyhow::Result<()> {
    let mut settings = config.replication.clone();
    if let Some(level) = consistency {
        if level == WriteConsistencyLevel::Default {
            anyhow::bail!("--consistency must be one of one, quorum, all");
        }
        settings.write_consistency = level;
    }

    let cluster = SimCluster::new(config.simulation.clone())?;
    tracing::info!(
        "Running {} writes with write consistency [{}]",
        writes,
        settings.write_consistency
    );

    let results = simulation::run_writes(&cluster, settings, writes).await;

    let mut succeeded = 0;
    for result in &results {
        match result {
            Ok(response) => {
                succeeded += 1;
                println!("{}", serde_json::to_string(response)?);
            }
            Err(e) => {
                let error = serde_json::json!({
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                });
                println!("{}", error);
            }
        }
    }

    let state = cluster.state_holder().state();
    tracing::info!(
        "{} of {} writes succeeded, cluster state version [{}]",
        succeeded,
        results.len(),
        state.version()
    );
    for (index, table) in state.routing_table().indices() {
        for shard in table.shards() {
            tracing::info!(
                "[{}][{}] {} of {} copies active",
                index,
                shard.shard_id().id,
                shard.active_shards().len(),
                shard.size()
            );
        }
    }
    Ok(())
}
