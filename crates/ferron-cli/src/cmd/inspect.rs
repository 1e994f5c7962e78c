//! `ferron inspect` — list a remote node's contexts.

use crate::ui;
use std::net::SocketAddr;
use std::path::Path;

pub async fn run(config: Option<&Path>, addr: SocketAddr) -> anyhow::Result<()> {
    let (core, peer) = super::connect(config, addr).await?;

    ui::section(&format!("{} ({})", peer.info().node_name, peer.id()));
    ui::kv("Address", &addr.to_string());
    ui::kv("Protocol", &peer.info().protocol);
    ui::kv("Uptime", &format!("{}s", peer.ping().await?));
    ui::blank();

    let names = peer.context_names();
    if names.is_empty() {
        ui::hint("no contexts published");
    }
    for name in names {
        let Some(def) = peer.context_definition(&name) else {
            continue;
        };
        ui::section(&format!("{name}: {} #{}", def.name, def.id));
        if !def.description.is_empty() {
            ui::kv("About", &def.description);
        }
        for member in def.members.keys() {
            if let Some(sig) = def
                .method_signature(member)
                .or_else(|| def.property_signature(member))
            {
                ui::member(&sig);
            }
        }
        ui::blank();
    }

    core.stop().await?;
    Ok(())
}
