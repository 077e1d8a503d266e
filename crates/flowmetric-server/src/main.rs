//! Flowmetric entrypoint: the long-running dashboard (`serve`) and the
//! batch collection job (`collect`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowmetric_server::ServerContext;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowmetric", version, about = "Engineering delivery metrics dashboard")]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "flowmetric.toml", env = "FLOWMETRIC_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dashboard server.
    Serve,
    /// Run one collection job and exit.
    Collect {
        /// Range spec: 30d/60d/90d/180d/365d, Q1-2026, 2026, or
        /// YYYY-MM-DD:YYYY-MM-DD.
        #[arg(long, default_value = "90d")]
        range: String,
        /// Environment name.
        #[arg(long, default_value = "default")]
        env: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = flowmetric_config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let default_filter = if config.dashboard.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Command::Serve => {
            let ctx = ServerContext::new(config)?;
            // Pre-load declared keys before accepting traffic.
            if !ctx.config.cache.warm_keys.is_empty() {
                let keys: Vec<_> = ctx
                    .config
                    .cache
                    .warm_keys
                    .iter()
                    .filter_map(|spec| flowmetric_cache::CacheKey::parse(spec).ok())
                    .collect();
                let warmed = ctx.cache.warm(&keys);
                tracing::info!(warmed, "startup cache warm finished");
            }
            flowmetric_server::run(ctx).await?;
        }
        Command::Collect { range, env } => {
            let range = range.parse().context("invalid --range")?;
            let ctx = ServerContext::new(config)?;
            let outcome = flowmetric_collector::run_collection_job(
                &ctx.effective_config(),
                range,
                &env,
                &ctx.cache,
                &ctx.bus,
            )
            .await?;
            tracing::info!(
                artifact = %outcome.artifact_path.display(),
                partial = outcome.partial,
                teams = outcome.teams,
                persons = outcome.persons,
                "collection finished"
            );
            if outcome.partial {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}
