//! Ferron kernel — remote-object invocation over peer-to-peer connections.
//!
//! A process exposes local objects ([`Context`]s) to connected peers; a peer
//! receives a [`Definition`](ferron_types::definition::Definition) describing
//! an object and builds an [`Interface`] proxy whose method and property
//! accesses travel back to the owning [`Stub`]. Object identity survives the
//! round trip: a proxy passed back to its owner resolves to the original
//! instance.
//!
//! - [`Netron`] owns contexts, stubs and the live peer set
//! - [`NetCore`] owns the transport node (listen, dial, stop)
//! - [`RemotePeer`] issues `get`/`set` calls to one connected process

pub mod config;
pub mod context;
pub mod events;
pub mod interface;
mod marshal;
pub mod netcore;
pub mod netron;
pub mod peer;
pub mod stub;

pub use context::{Context, Reflection, Value};
pub use events::NetronEvent;
pub use interface::{Interface, InterfaceFactory};
pub use netcore::NetCore;
pub use netron::Netron;
pub use peer::RemotePeer;
pub use stub::{Stub, StubManager};
