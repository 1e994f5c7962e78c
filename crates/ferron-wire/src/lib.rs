//! Ferron wire layer — transport, framing, and request correlation.
//!
//! Everything the remote-object core treats as an opaque collaborator lives
//! here: streams produced by a [`Transport`], protocol negotiation, the
//! length-prefixed JSON codec, and the multiplexed [`Connection`] that turns a
//! stream into pipelined request/response pairs.
//!
//! ## Architecture
//!
//! - **Transport / Listener**: dial and accept raw streams (TCP built in)
//! - **Connection**: one handshaken stream with correlated, concurrent requests
//! - **PeerRegistry**: address book of known peers and their published contexts
//! - **WireMessage**: JSON-framed protocol messages

pub mod connection;
pub mod message;
pub mod registry;
pub mod transport;

pub use connection::{Connection, Inbound, WireError};
pub use message::{Hello, WireMessage, WireNotification, WireRequest, WireResponse};
pub use registry::{Direction, PeerEntry, PeerRegistry};
pub use transport::{BoxStream, Listener, TcpTransport, Transport};
