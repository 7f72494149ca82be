//! fmq-orchestrator command line - inspect the tool graph and the persisted cache.
//!
//! Subcommands:
//! - `tools`: declared tools and their prerequisites
//! - `plan <tool> --params <json>`: execution plan against the persisted cache
//! - `cache stats`: valid/expired entries per level
//! - `cache invalidate <prefix>`: clear a subtree and write the cache back

use clap::{Parser, Subcommand};
use fmq_orchestrator::cache::CacheHierarchy;
use fmq_orchestrator::kernel::DependencyResolver;
use fmq_orchestrator::tools::ddr;
use fmq_orchestrator::types::ToolParams;
use fmq_orchestrator::{Config, Error};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fmq-orchestrator")]
#[command(about = "Dependency-aware tool orchestration over a hierarchical cache")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, env = "FMQ_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List declared tools
    Tools,

    /// Show the execution plan for a request
    Plan {
        /// Tool to request
        tool: String,

        /// Caller arguments as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Inspect or modify the persisted cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Entry counts per level
    Stats,

    /// Remove every entry at or below a key prefix
    Invalidate {
        /// Key prefix, e.g. `db:Sales`
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .apply_env()?;

    fmq_orchestrator::observability::init_tracing(&config.observability);

    let registry = Arc::new(ddr::registry()?);

    match cli.command {
        Commands::Tools => {
            for descriptor in registry.catalog().descriptors() {
                println!("{}", descriptor.summary_line());
            }
        }
        Commands::Plan { tool, params } => {
            let args: ToolParams = serde_json::from_str(&params)?;
            let cache = Arc::new(CacheHierarchy::new(config.cache.clone()));
            cache.load().await?;
            let resolver = DependencyResolver::new(registry, cache);
            match resolver.plan(&tool, &args).await {
                Ok(plan) => print!("{}", plan),
                Err(e) => {
                    eprintln!("{}: {}", e.kind(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Cache { command } => {
            let cache = CacheHierarchy::new(config.cache.clone());
            cache.load().await?;
            match command {
                CacheCommands::Stats => {
                    for (level, stats) in cache.stats().await {
                        println!("{:<10} valid={} expired={}", level, stats.valid, stats.expired);
                    }
                }
                CacheCommands::Invalidate { prefix } => {
                    if prefix.is_empty() {
                        return Err(Error::configuration("prefix cannot be empty").into());
                    }
                    let removed = cache.invalidate_prefix(&prefix).await;
                    cache.save().await?;
                    println!("removed {} entries under '{}'", removed, prefix);
                }
            }
        }
    }

    Ok(())
}
