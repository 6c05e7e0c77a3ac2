//! Shared IPC protocol types and framing.
//!
//! Defines the wire format for the control socket: 4-byte big-endian length
//! prefix followed by a UTF-8 JSON-RPC 2.0 payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! The six methods and their payloads are typed: a [`Request`] has one
//! variant per method and a [`Reply`] one variant per result.

use crate::chain::{BlockHash, Txid};
use crate::config::ControlConfig;
use crate::error::{Result, SimError};
use crate::node::ChainTip;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Payload for methods that take or return nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// The backing node's P2P endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub p2p: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub address: String,
    /// Amount in the chain's smallest unit.
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub txid: Txid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MineRequest {
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MineResult {
    /// Mined block hashes in chain order.
    pub blocks: Vec<BlockHash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipInfo {
    pub height: i32,
    pub hash: BlockHash,
}

impl From<ChainTip> for TipInfo {
    fn from(tip: ChainTip) -> Self {
        Self {
            height: tip.height,
            hash: tip.hash,
        }
    }
}

/// A control request, one variant per method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Request {
    Ping(Empty),
    Address(Empty),
    Send(SendRequest),
    Mine(MineRequest),
    BestBlock(Empty),
    Stop(Empty),
}

impl Request {
    /// Stable method names, as they appear on the wire.
    pub const METHODS: [&'static str; 6] = ["Ping", "Address", "Send", "Mine", "BestBlock", "Stop"];

    pub fn method(&self) -> &'static str {
        match self {
            Request::Ping(_) => "Ping",
            Request::Address(_) => "Address",
            Request::Send(_) => "Send",
            Request::Mine(_) => "Mine",
            Request::BestBlock(_) => "BestBlock",
            Request::Stop(_) => "Stop",
        }
    }

    /// Decode a method name and its params.
    pub fn parse(method: &str, params: serde_json::Value) -> Result<Self> {
        if !Self::METHODS.contains(&method) {
            return Err(SimError::MethodNotFound {
                method: method.to_string(),
            });
        }

        serde_json::from_value(serde_json::json!({ "method": method, "params": params })).map_err(
            |e| SimError::Validation {
                field: "params".to_string(),
                message: format!("{}: {}", method, e),
            },
        )
    }

    /// Wrap this request in a JSON-RPC envelope.
    pub fn to_ipc(&self, id: u64) -> Result<IpcRequest> {
        let params = match serde_json::to_value(self)? {
            serde_json::Value::Object(mut map) => map
                .remove("params")
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            _ => serde_json::Value::Object(Default::default()),
        };
        Ok(IpcRequest::new(self.method(), params, id))
    }
}

/// A control reply, serialized as the bare result value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Pong(String),
    Address(AddressInfo),
    Send(SendResult),
    Mine(MineResult),
    BestBlock(TipInfo),
    Stop(Empty),
}

/// JSON-RPC 2.0 request for IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

impl IpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(serde_json::Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response for IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcError>,
    pub id: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Create a success response.
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(IpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection between frames). EOF
/// in the middle of a frame is `ConnectionClosed`.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(SimError::transport(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > ControlConfig::MAX_IPC_MESSAGE_SIZE {
        return Err(SimError::Validation {
            field: "ipc_frame".to_string(),
            message: format!(
                "IPC message size {} exceeds maximum {}",
                len,
                ControlConfig::MAX_IPC_MESSAGE_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(SimError::transport)?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(SimError::transport)?;
    writer.write_all(payload).await.map_err(SimError::transport)?;
    writer.flush().await.map_err(SimError::transport)?;
    Ok(())
}
