//! chainsink CLI: track USDC events on an EVM network and fan them out.
//!
//! Usage:
//! ```bash
//! RPC_URL=https://... SINKS=console,filesystem chainsink run
//! chainsink run --network mainnet --sinks console,sql
//! chainsink info
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use chainsink_core::logging::{init_tracing, LogConfig};
use chainsink_core::CancellationToken;
use chainsink_tracker::{default_registry, supported_networks, usdc_address, RpcEventSource, Tracker, TrackerConfig};

#[derive(Parser)]
#[command(
    name = "chainsink",
    about = "Track USDC Transfer/Approval events and deliver them to sinks",
    long_about = "
ChainSink polls an EVM node for the latest block, keeps the transactions that
touched the USDC contract and hands them to every configured sink.

ENVIRONMENT VARIABLES:
  RPC_URL               JSON-RPC endpoint (required, WEBHOOK_URL also accepted)
  NETWORK               mainnet | sepolia | arbitrum | avalanche | linea | polygon | optimism
  SINKS                 comma-separated: console, filesystem, sql, elasticsearch, kafka
  BLOCK_INTERVAL_SECS   poll interval (default 12)
  FS_*, SQL_*, ELASTICSEARCH_*, KAFKA_*   per-sink settings
",
    version
)]
struct Cli {
    /// Default log level (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker until Ctrl-C
    Run {
        /// Override NETWORK
        #[arg(long)]
        network: Option<String>,
        /// Override SINKS (comma-separated)
        #[arg(long, value_delimiter = ',')]
        sinks: Vec<String>,
        /// Override BLOCK_INTERVAL_SECS
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Show supported networks and sinks
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(
        &LogConfig::default()
            .with_level(cli.log_level.clone())
            .with_json(cli.json_logs),
    );

    match cli.command.unwrap_or(Commands::Run {
        network: None,
        sinks: vec![],
        interval_secs: None,
    }) {
        Commands::Run {
            network,
            sinks,
            interval_secs,
        } => cmd_run(network, sinks, interval_secs).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_run(network: Option<String>, sinks: Vec<String>, interval_secs: Option<u64>) -> Result<()> {
    let mut config = TrackerConfig::from_env().context("loading configuration")?;
    if let Some(network) = network {
        config = config.with_network(&network)?;
    }
    if !sinks.is_empty() {
        config = config.with_sinks(sinks);
    }
    if let Some(secs) = interval_secs {
        config = config.with_block_interval(std::time::Duration::from_secs(secs));
    }

    let source = RpcEventSource::new(&config.rpc_url, config.contract_address, config.rpc_timeout)
        .context("creating RPC client")?;
    let mut tracker = Tracker::from_config(config, source).context("building sinks")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down gracefully");
            shutdown.cancel();
        }
    });

    info!("starting USDC event tracker");
    let stats = tracker.run(cancel).await.context("tracker error")?;
    info!(blocks = stats.blocks_processed, events = stats.events, "tracker stopped");
    Ok(())
}

fn cmd_info() {
    println!("ChainSink v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default network: sepolia");
    println!("  Default block interval: 12s");
    println!("  Default batching: 100 records, flush every 5s, 30s flush timeout");
    println!("  Networks:");
    for network in supported_networks() {
        if let Some(address) = usdc_address(network) {
            println!("    {network:<10} USDC {address}");
        }
    }
    println!("  Sinks: {}", default_registry().names().join(", "));
    println!("  Recognized but unsupported: mongodb");
}
