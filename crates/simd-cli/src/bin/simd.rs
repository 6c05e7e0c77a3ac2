//! simd - control daemon for a local simnet node.
//!
//! Starts the backing node, binds the control socket and serves requests until
//! a client sends `Stop` or the process receives Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use simd_core::{ControlConfig, ControlServer, LogLevel, PortAllocator, ServerConfig, SimNode};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "simd")]
#[command(about = "Control daemon for a local simnet node")]
struct Args {
    /// Path of the control socket
    #[arg(long, default_value = ControlConfig::DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Node RPC port (0 = auto-assign)
    #[arg(long, default_value = "0")]
    rpc_port: u16,

    /// Node P2P port (0 = auto-assign)
    #[arg(long, default_value = "0")]
    p2p_port: u16,

    /// Node log level (trace, debug, info, warn, error, critical, off)
    #[arg(long, default_value = "off")]
    debuglevel: String,

    /// Enable debug logging for the daemon itself
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let node_level = LogLevel::parse_or_off(&args.debuglevel);
    if node_level == LogLevel::Off && !args.debuglevel.eq_ignore_ascii_case("off") {
        warn!("Unknown debug level {:?}, node logging off", args.debuglevel);
    }

    let config = ServerConfig::new(&args.socket)
        .with_rpc_port(args.rpc_port)
        .with_p2p_port(args.p2p_port)
        .with_log_level(node_level);

    let ports = PortAllocator::new();
    let server = Arc::new(
        ControlServer::bind(&config, &ports, SimNode::default())
            .await
            .with_context(|| format!("Failed to start server on {}", args.socket.display()))?,
    );

    info!(
        "simd ready on {} (p2p :{}, rpc :{})",
        server.socket_path().display(),
        server.p2p_port(),
        server.rpc_port()
    );

    let served = tokio::select! {
        result = server.serve() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutdown signal received");
            Ok(())
        }
    };

    let closed = server.close().await;
    served.context("Control server failed")?;
    closed.context("Failed to tear down node")?;

    info!("simd stopped");
    Ok(())
}
