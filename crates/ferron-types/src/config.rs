//! Node configuration.

use crate::error::{FerronError, FerronResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Reserved protocol identifier for Ferron traffic on a transport node.
pub const DEFAULT_PROTOCOL_ID: &str = "/ferron/1.0.0";

/// Default response timeout (3 minutes).
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 180;

/// Default maximum frame size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Configuration for a Ferron node. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetronConfig {
    /// This node's unique identity, exchanged during the handshake.
    pub node_id: String,
    /// Human-readable node name.
    pub node_name: String,
    /// Address the node listens on when started.
    pub listen_addr: SocketAddr,
    /// Protocol identifier negotiated on every stream.
    pub protocol_id: String,
    /// How long a get/set may wait for its response.
    pub response_timeout_secs: u64,
    /// Largest accepted frame, in bytes.
    pub max_message_size: u32,
    /// Peers dialed right after the listener comes up.
    pub bootstrap: Vec<SocketAddr>,
}

impl Default for NetronConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            node_name: "ferron-node".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            protocol_id: DEFAULT_PROTOCOL_ID.to_string(),
            response_timeout_secs: DEFAULT_RESPONSE_TIMEOUT_SECS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            bootstrap: Vec::new(),
        }
    }
}

impl NetronConfig {
    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> FerronResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(FerronError::InvalidArgument("node_id must not be empty".into()));
        }
        if self.protocol_id.trim().is_empty() {
            return Err(FerronError::InvalidArgument(
                "protocol_id must not be empty".into(),
            ));
        }
        if self.response_timeout_secs == 0 {
            return Err(FerronError::InvalidArgument(
                "response_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.max_message_size < 1024 {
            return Err(FerronError::InvalidArgument(format!(
                "max_message_size {} is too small (min 1024)",
                self.max_message_size
            )));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}
