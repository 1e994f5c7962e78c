//! `ferron serve` — run a node until interrupted.

use crate::node::{NodeContext, NODE_CONTEXT};
use crate::ui;
use anyhow::Context as _;
use ferron_kernel::config::load_config;
use ferron_kernel::{NetCore, Netron};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub async fn run(config: Option<&Path>, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let netron = Netron::new(load_config(config))?;
    netron.attach_context(NodeContext::new(&netron), Some(NODE_CONTEXT))?;

    let core = NetCore::new(Arc::clone(&netron));
    core.start(listen).await?;
    let addr = core
        .local_addr()
        .context("node started without a listen address")?;

    ui::section("Ferron node");
    ui::kv("Node id", netron.node_id());
    ui::kv("Name", &netron.config().node_name);
    ui::kv("Listening", &addr.to_string());
    ui::kv("Protocol", &netron.config().protocol_id);
    ui::kv("Contexts", &netron.context_names().join(", "));
    ui::blank();
    ui::hint(&format!("ferron inspect {addr}"));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    core.stop().await?;
    netron.detach_all_contexts(true);
    ui::success("Node stopped");
    Ok(())
}
