//! Control socket IPC.
//!
//! Length-prefixed JSON-RPC 2.0 over a Unix domain socket.
//!
//! # Architecture
//!
//! - **Server**: Owns the backing node, accepts connections, serves each on its own task
//! - **Handler**: Maps the six control methods onto the backing node
//! - **Client**: Dials the socket and issues typed calls
//! - **Protocol**: Shared framing and request/reply types used by both ends

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use handler::Handler;
pub use protocol::{IpcRequest, IpcResponse, Reply, Request, TipInfo};
pub use server::{ControlServer, IpcDispatch};
