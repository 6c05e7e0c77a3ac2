//! sim - command-line client for a running simd.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use simd_core::{ControlClient, ControlConfig};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sim")]
#[command(about = "Drive a local simnet node through simd")]
struct Args {
    /// Path of the control socket
    #[arg(long, default_value = ControlConfig::DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Display the node's P2P address
    Address,
    /// Mine blocks
    Mine {
        /// Number of blocks to mine
        count: u32,
    },
    /// Send funds to an address
    Send {
        address: String,
        /// Amount in the smallest unit
        amount: i64,
    },
    /// Query the highest block
    Bestblock,
    /// Wait until the chain reaches a height
    Sync {
        height: i32,
    },
    /// Stop the daemon and its node
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let client = ControlClient::dial(&args.socket)
        .await
        .with_context(|| format!("Failed to connect to {}", args.socket.display()))?;

    client.ping().await.context("simd did not answer ping")?;

    match args.command {
        Command::Address => {
            let address = client.address().await?;
            println!("P2P address: {}", address);
        }
        Command::Mine { count } => {
            let blocks = client.mine(count).await?;
            for hash in blocks {
                println!("{}", hash);
            }
        }
        Command::Send { address, amount } => {
            let txid = client.send(address, amount).await?;
            println!("TXID: {}", txid);
        }
        Command::Bestblock => {
            let tip = client.best_block().await?;
            println!("height: {}, hash: {}", tip.height, tip.hash);
        }
        Command::Sync { height } => {
            client.sync(height).await?;
            let tip = client.best_block().await?;
            println!("height: {}, hash: {}", tip.height, tip.hash);
        }
        Command::Stop => {
            client.stop().await?;
        }
    }

    Ok(())
}
