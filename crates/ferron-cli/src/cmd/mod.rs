//! Subcommand implementations.

pub mod call;
pub mod inspect;
pub mod serve;

use ferron_kernel::config::load_config;
use ferron_kernel::{NetCore, Netron, RemotePeer};
use ferron_types::config::NetronConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

/// Configuration for a short-lived client node. The node id is always fresh
/// so a client sharing a config file with a running server is not mistaken
/// for it.
pub fn client_config(path: Option<&Path>) -> NetronConfig {
    let mut config = load_config(path);
    config.node_id = uuid::Uuid::new_v4().to_string();
    config.node_name = "ferron-cli".to_string();
    config
}

/// Dial `addr` from a fresh client node.
pub async fn connect(
    path: Option<&Path>,
    addr: SocketAddr,
) -> anyhow::Result<(NetCore, Arc<RemotePeer>)> {
    let core = NetCore::new(Netron::new(client_config(path))?);
    let peer = core.connect(addr).await?;
    Ok((core, peer))
}
