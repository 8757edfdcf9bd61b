//! Tendril Node - BFT validator node.

use clap::Parser;
use std::path::PathBuf;
use tendril_node::observability::{init_logging, LogFormat};
use tendril_node::{Node, NodeConfig};

/// Tendril Node - Tendermint-style BFT validator
#[derive(Parser, Debug)]
#[command(name = "tendril-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tendril.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging(&args.log_level, format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting tendril node"
    );

    let config = NodeConfig::load(Some(args.config.as_path()))?;
    let node = Node::build(config).await?;

    node.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    })
    .await
}
