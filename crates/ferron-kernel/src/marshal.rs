//! Conversion between local values and wire values.
//!
//! Outbound, objects never travel by value: a context is disclosed as a
//! definition (registered as a stub first), a proxy headed back to the peer
//! that owns it degrades to a reference, and an ordered group of objects
//! becomes a definitions sequence. Inbound is the mirror image.

use crate::context::{context_key, Context, Value};
use crate::interface::Interface;
use crate::netron::Netron;
use crate::peer::RemotePeer;
use ferron_types::error::{FerronError, FerronResult};
use ferron_types::value::WireValue;
use std::sync::Arc;

/// Where a disclosed object comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Produced by a call served by the local stub with this definition id.
    Stub(u64),
    /// Passed as an argument of a call on the remote definition with this id.
    Call(u64),
}

impl Origin {
    pub(crate) fn parent_id(self) -> u64 {
        match self {
            Origin::Stub(id) | Origin::Call(id) => id,
        }
    }

    pub(crate) fn stub(self) -> Option<u64> {
        match self {
            Origin::Stub(id) => Some(id),
            Origin::Call(_) => None,
        }
    }
}

/// Marshal `value` for transmission to `peer`.
pub(crate) fn marshal_out(
    netron: &Netron,
    value: Value,
    peer: &RemotePeer,
    origin: Origin,
) -> FerronResult<WireValue> {
    Ok(match value {
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(b),
        Value::Int(i) => WireValue::Int(i),
        Value::Float(f) if !f.is_finite() => {
            return Err(FerronError::Serialization(format!(
                "non-finite number {f} cannot be sent"
            )))
        }
        Value::Float(f) => WireValue::Float(f),
        Value::String(s) => WireValue::String(s),
        Value::Bytes(b) => WireValue::Bytes(b),
        Value::List(items) => WireValue::List(
            items
                .into_iter()
                .map(|v| marshal_out(netron, v, peer, origin))
                .collect::<FerronResult<_>>()?,
        ),
        Value::Map(entries) => WireValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, marshal_out(netron, v, peer, origin)?)))
                .collect::<FerronResult<_>>()?,
        ),
        Value::Contexts(items) => WireValue::Definitions(
            items
                .into_iter()
                .map(|v| marshal_out(netron, v, peer, origin))
                .collect::<FerronResult<_>>()?,
        ),
        Value::Interface(interface) => marshal_interface(netron, interface, peer, origin)?,
        Value::Context(ctx) => match ctx.as_interface() {
            Some(interface) => marshal_interface(netron, interface, peer, origin)?,
            None => {
                let key = context_key(&ctx);
                let def = netron.stubs().ref_context(peer.id(), key, ctx, origin)?;
                WireValue::Definition(Box::new(def))
            }
        },
    })
}

fn marshal_interface(
    netron: &Netron,
    interface: Interface,
    peer: &RemotePeer,
    origin: Origin,
) -> FerronResult<WireValue> {
    if interface.peer_id() == peer.id() {
        // The receiver owns this object already; send the id only.
        return Ok(WireValue::Reference(interface.definition().to_reference()));
    }
    // Re-export a proxy for a third peer's object.
    let key = interface.key();
    let instance: Arc<dyn Context> = Arc::new(interface);
    let def = netron.stubs().ref_context(peer.id(), key, instance, origin)?;
    Ok(WireValue::Definition(Box::new(def)))
}

/// Unmarshal a value received from `peer`.
pub(crate) fn unmarshal(
    netron: &Netron,
    value: WireValue,
    peer: &Arc<RemotePeer>,
) -> FerronResult<Value> {
    Ok(match value {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(i) => Value::Int(i),
        WireValue::Float(f) => Value::Float(f),
        WireValue::String(s) => Value::String(s),
        WireValue::Bytes(b) => Value::Bytes(b),
        WireValue::List(items) => Value::List(
            items
                .into_iter()
                .map(|v| unmarshal(netron, v, peer))
                .collect::<FerronResult<_>>()?,
        ),
        WireValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, unmarshal(netron, v, peer)?)))
                .collect::<FerronResult<_>>()?,
        ),
        WireValue::Reference(reference) => netron
            .stubs()
            .get_stub(reference.def_id)
            .map(|stub| stub.instance_value())
            .ok_or(FerronError::UnknownDefinition(reference.def_id))?,
        WireValue::Definition(def) => {
            let def = peer.register_definition(*def);
            Value::Interface(netron.interfaces().create(def, peer))
        }
        WireValue::Definitions(items) => Value::Contexts(
            items
                .into_iter()
                .map(|v| unmarshal(netron, v, peer))
                .collect::<FerronResult<_>>()?,
        ),
    })
}

/// Unmarshal method arguments: a list spreads, null means none, anything
/// else is a single argument.
pub(crate) fn unmarshal_args(
    netron: &Netron,
    data: WireValue,
    peer: &Arc<RemotePeer>,
) -> FerronResult<Vec<Value>> {
    match data {
        WireValue::Null => Ok(Vec::new()),
        WireValue::List(items) => items
            .into_iter()
            .map(|v| unmarshal(netron, v, peer))
            .collect(),
        other => Ok(vec![unmarshal(netron, other, peer)?]),
    }
}
