//! Wire protocol message types.
//!
//! All communication between Ferron peers uses JSON-framed messages over a
//! negotiated stream. Each frame is prefixed with a 4-byte big-endian length
//! header.

use ferron_types::definition::Definition;
use ferron_types::error::RemoteError;
use ferron_types::value::WireValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A wire protocol message (envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Correlation id. Responses carry the id of the request they answer.
    pub id: u64,
    /// Message variant.
    #[serde(flatten)]
    pub kind: WireMessageKind,
}

/// The different kinds of wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessageKind {
    /// Request from one peer to another.
    #[serde(rename = "request")]
    Request(WireRequest),
    /// Response to a request.
    #[serde(rename = "response")]
    Response(WireResponse),
    /// One-way notification (no response expected).
    #[serde(rename = "notification")]
    Notification(WireNotification),
}

/// Identity and published contexts exchanged when a connection opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    /// The peer's unique node ID.
    pub node_id: String,
    /// Human-readable node name.
    pub node_name: String,
    /// Protocol version.
    pub protocol_version: u32,
    /// Attached contexts, by name.
    #[serde(default)]
    pub contexts: BTreeMap<String, Definition>,
}

/// Request messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireRequest {
    /// Handshake: exchange peer identity.
    #[serde(rename = "handshake")]
    Handshake(Hello),
    /// Read a property or call a method and return its result.
    #[serde(rename = "get")]
    Get {
        def_id: u64,
        name: String,
        /// Argument list for methods, default value for properties.
        data: WireValue,
    },
    /// Write a property or call a method, discarding its result.
    #[serde(rename = "set")]
    Set {
        def_id: u64,
        name: String,
        data: WireValue,
    },
    /// Ping to check if the peer is alive.
    #[serde(rename = "ping")]
    Ping,
}

/// Response messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WireResponse {
    /// Handshake acknowledgement.
    #[serde(rename = "handshake_ack")]
    HandshakeAck(Hello),
    /// Result of a get.
    #[serde(rename = "value")]
    Value { value: WireValue },
    /// Completion of a set.
    #[serde(rename = "ack")]
    Ack,
    /// Pong response.
    #[serde(rename = "pong")]
    Pong {
        /// Uptime in seconds.
        uptime_secs: u64,
    },
    /// Error response.
    #[serde(rename = "error")]
    Error { error: RemoteError },
}

/// Notification messages (one-way, no response).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum WireNotification {
    /// A context was attached on the peer.
    #[serde(rename = "context_attached")]
    ContextAttached { ctx_id: String, definition: Definition },
    /// A context was detached on the peer.
    #[serde(rename = "context_detached")]
    ContextDetached { ctx_id: String, def_id: u64 },
    /// Peer is shutting down.
    #[serde(rename = "shutting_down")]
    ShuttingDown,
}

/// Protocol negotiation: the dialer's ordered list of acceptable protocols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolProposal {
    pub protocols: Vec<String>,
}

/// Protocol negotiation: the listener's choice, or `None` if it supports none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSelection {
    pub protocol: Option<String>,
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Encode any frame body to bytes (4-byte big-endian length + JSON).
pub fn encode_frame<T: Serialize>(body: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(body)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    encode_frame(msg)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into any frame type.
pub fn decode_frame<T: DeserializeOwned>(body: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    decode_frame(body)
}

/// The envelope fields of a frame whose payload could not be decoded.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameHeader {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Parse only the id and message type of a JSON body.
pub fn decode_header(body: &[u8]) -> Result<FrameHeader, serde_json::Error> {
    decode_frame(body)
}
