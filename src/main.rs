use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chaintap::{Indexer, IndexerError, indexer, load_config};

#[derive(Parser)]
#[command(name = "chaintap", version, about = "Zero-configuration EVM event indexer")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./chaintap.yaml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll continuously, indexing new events as blocks are confirmed.
    Watch,
    /// Index a fixed historical block range once, then exit.
    Backfill {
        #[arg(long)]
        from_block: u64,
        /// A block number, or "latest".
        #[arg(long, default_value = "latest")]
        to_block: String,
    },
    /// Print per-contract sync progress and provider health.
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(error) = run(cli).await {
        error!("{error}");
        std::process::exit(error.exit_code());
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "chaintap=debug" } else { "chaintap=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), IndexerError> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Watch => {
            let indexer = Indexer::new(&config).await?;
            let shutdown = indexer.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    shutdown.cancel();
                }
            });
            indexer.watch().await;
            indexer.close().await;
        }
        Command::Backfill { from_block, to_block } => {
            let to_block = parse_to_block(&to_block)?;
            let indexer = Indexer::new(&config).await?;
            let inserted = indexer.backfill(from_block, to_block).await?;
            indexer.close().await;
            println!("Backfill complete: {inserted} new events");
        }
        Command::Status => {
            let indexer = Indexer::new(&config).await?;
            let now = indexer::unix_now();
            for status in indexer.status().await? {
                println!("{}\n", status.render(now));
            }
            println!("Providers:");
            for health in indexer.provider_health() {
                let state = if health.healthy { "healthy" } else { "unhealthy" };
                println!("  {} (priority {}): {state}", health.url, health.priority);
            }
            indexer.close().await;
        }
    }

    Ok(())
}

fn parse_to_block(raw: &str) -> Result<Option<u64>, IndexerError> {
    if raw == "latest" {
        return Ok(None);
    }
    raw.parse::<u64>().map(Some).map_err(|_| {
        IndexerError::config(format!("invalid --to-block value: {raw} (expected a number or \"latest\")"))
    })
}
