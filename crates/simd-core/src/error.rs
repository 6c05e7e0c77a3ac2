//! Error types for the simd control plane.
//!
//! Errors fall into the transport, protocol, upstream, resource and teardown
//! groups. Each maps to a JSON-RPC error code so the server can report it and
//! the client can reconstruct it on the other side of the socket.

use std::path::PathBuf;
use thiserror::Error;

/// Wire error codes.
///
/// The standard JSON-RPC range covers envelope failures; the application range
/// (-32000 to -32099) covers node and chain conditions.
pub mod rpc_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const INVALID_ADDRESS: i32 = -32010;
    pub const SCRIPT_ERROR: i32 = -32011;
    pub const UPSTREAM_ERROR: i32 = -32012;
    pub const UNEXPECTED_REPLY: i32 = -32013;
    pub const NODE_STOPPED: i32 = -32014;
}

/// Main error type for simd.
#[derive(Debug, Error)]
pub enum SimError {
    // Transport errors
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Control socket unavailable at {path:?}: {source}")]
    SocketUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Protocol errors
    #[error("Unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply { expected: String, actual: String },

    #[error("Unknown method: {method}")]
    MethodNotFound { method: String },

    // Chain and node errors
    #[error("Could not decode address {address:?}: {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Could not create pay to addr script: {message}")]
    Script { message: String },

    #[error("{operation} failed: {message}")]
    Upstream { operation: String, message: String },

    #[error("Backing node is not running")]
    NodeStopped,

    // Resource errors
    #[error("Port exhaustion: no free port in {start}..={end}")]
    PortsExhausted { start: u16, end: u16 },

    // Error reported by the remote end of the control socket
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for simd operations.
pub type Result<T> = std::result::Result<T, SimError>;

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        SimError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        SimError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SimError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SimError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Wrap a backing node failure with the operation that was attempted.
    pub fn upstream(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SimError::Upstream {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Classify an IO error seen on an established control connection.
    ///
    /// EOF, resets and broken pipes all mean the peer went away, which is the
    /// expected outcome of a `Stop` call.
    pub fn transport(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => SimError::ConnectionClosed,
            _ => err.into(),
        }
    }

    /// Rebuild an error reported by the server.
    pub fn from_remote(code: i32, message: String) -> Self {
        SimError::Remote { code, message }
    }

    /// Returns true for errors that mean the control connection is gone.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, SimError::ConnectionClosed)
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Remote errors keep the code the server sent.
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            SimError::InvalidAddress { .. } => rpc_codes::INVALID_ADDRESS,
            SimError::Script { .. } => rpc_codes::SCRIPT_ERROR,
            SimError::Upstream { .. } => rpc_codes::UPSTREAM_ERROR,
            SimError::UnexpectedReply { .. } => rpc_codes::UNEXPECTED_REPLY,
            SimError::NodeStopped => rpc_codes::NODE_STOPPED,
            SimError::MethodNotFound { .. } => rpc_codes::METHOD_NOT_FOUND,
            SimError::Json { .. } => rpc_codes::PARSE_ERROR,
            SimError::Validation { .. } => rpc_codes::INVALID_PARAMS,
            SimError::Remote { code, .. } => *code,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}
