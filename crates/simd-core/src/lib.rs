//! simd core - control plane for a local simnet node.
//!
//! A [`ControlServer`] owns a backing node (anything implementing
//! [`ProcessController`]) and exposes six operations over a Unix domain socket:
//! `Ping`, `Address`, `Send`, `Mine`, `BestBlock` and `Stop`. A
//! [`ControlClient`] dials the socket and issues typed calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use simd_core::{ControlClient, ControlServer, PortAllocator, ServerConfig, SimNode};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> simd_core::Result<()> {
//!     let ports = PortAllocator::new();
//!     let config = ServerConfig::new("/tmp/simd.sock");
//!     let server = Arc::new(ControlServer::bind(&config, &ports, SimNode::default()).await?);
//!     tokio::spawn({
//!         let server = server.clone();
//!         async move { server.serve().await }
//!     });
//!
//!     let client = ControlClient::dial("/tmp/simd.sock").await?;
//!     client.mine(3).await?;
//!     println!("height {}", client.best_block().await?.height);
//!     client.stop().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod chain;
pub mod config;
pub mod error;
pub mod harness;
pub mod ipc;
pub mod logwatch;
pub mod node;
pub mod ports;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use chain::{decode_address, Address, BlockHash, ChainParams, Txid};
pub use config::{ControlConfig, LogLevel, ServerConfig};
pub use error::{Result, SimError};
pub use harness::LocalSim;
pub use ipc::{ControlClient, ControlServer, Handler, TipInfo};
pub use logwatch::LogWatcher;
pub use node::{ChainTip, NodeOptions, ProcessController, SimNode};
pub use ports::PortAllocator;
