//! Centralized configuration for simd.
//!
//! This module provides timing and sizing constants for the control plane,
//! the runtime startup parameters of a server, and the backing node log level.

use crate::chain::ChainParams;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Control-plane constants.
pub struct ControlConfig;

impl ControlConfig {
    pub const DEFAULT_SOCKET: &'static str = "/tmp/simd.sock";

    // Polling
    pub const SYNC_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const LOG_POLL_INTERVAL: Duration = Duration::from_millis(50);

    // Dialing
    pub const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);
    pub const DIAL_READY_TIMEOUT: Duration = Duration::from_secs(30);

    // Port probing
    pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

    // Framing
    pub const MAX_IPC_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
}

/// Log level handed to the backing node.
///
/// `Off` still gives the node a log directory; nothing is written there and
/// nothing is tailed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    #[default]
    Off,
}

impl LogLevel {
    /// Full lowercase name, as accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Off => "off",
        }
    }

    /// Short tag written in front of each node log line.
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRC",
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warn => "WRN",
            LogLevel::Error => "ERR",
            LogLevel::Critical => "CRT",
            LogLevel::Off => "OFF",
        }
    }

    /// Whether a message at `level` passes this threshold.
    pub fn enables(&self, level: LogLevel) -> bool {
        *self != LogLevel::Off && level != LogLevel::Off && level >= *self
    }

    /// Parse a level name, falling back to `Off` for anything unrecognised.
    pub fn parse_or_off(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" | "trc" => Ok(LogLevel::Trace),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "info" | "inf" => Ok(LogLevel::Info),
            "warn" | "wrn" => Ok(LogLevel::Warn),
            "error" | "err" => Ok(LogLevel::Error),
            "critical" | "crt" => Ok(LogLevel::Critical),
            "off" => Ok(LogLevel::Off),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Startup parameters for a control server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the control socket.
    pub socket_path: PathBuf,
    /// P2P listen port for the backing node (0 = auto-allocate).
    pub p2p_port: u16,
    /// RPC listen port for the backing node (0 = auto-allocate).
    pub rpc_port: u16,
    /// Backing node log level.
    pub log_level: LogLevel,
    /// Network the handler decodes addresses for.
    pub params: ChainParams,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(ControlConfig::DEFAULT_SOCKET),
            p2p_port: 0,
            rpc_port: 0,
            log_level: LogLevel::Off,
            params: ChainParams::SIMNET,
        }
    }
}

impl ServerConfig {
    /// Create a config for the given socket path with auto-allocated ports.
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Set the P2P port.
    pub fn with_p2p_port(mut self, port: u16) -> Self {
        self.p2p_port = port;
        self
    }

    /// Set the RPC port.
    pub fn with_rpc_port(mut self, port: u16) -> Self {
        self.rpc_port = port;
        self
    }

    /// Set the backing node log level.
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Set the network parameters.
    pub fn with_chain_params(mut self, params: ChainParams) -> Self {
        self.params = params;
        self
    }
}
