//! `ferron call` — invoke one member of a remote context.

use crate::ui;
use anyhow::bail;
use ferron_kernel::Value;
use std::net::SocketAddr;
use std::path::Path;

/// Parse a command-line argument as JSON; anything that is not valid JSON is
/// taken as a plain string.
pub fn parse_arg(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
        .into()
}

pub async fn run(
    config: Option<&Path>,
    addr: SocketAddr,
    context: &str,
    member: &str,
    args: &[String],
) -> anyhow::Result<()> {
    let (core, peer) = super::connect(config, addr).await?;
    let iface = peer.query_interface(context)?;
    let Some(meta) = iface.definition().member(member) else {
        bail!("'{member}' is not a member of context '{context}'");
    };
    let mut args: Vec<Value> = args.iter().map(|a| parse_arg(a)).collect();

    let result = if meta.is_method() {
        Some(iface.call(member, args).await?)
    } else if args.is_empty() {
        Some(iface.get(member, Value::Null).await?)
    } else if args.len() == 1 {
        iface.set(member, args.remove(0)).await?;
        None
    } else {
        bail!("property '{member}' takes a single value");
    };

    match result {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value.to_json())?),
        None => ui::success(&format!("{context}.{member} updated")),
    }
    core.stop().await?;
    Ok(())
}
