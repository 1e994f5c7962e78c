//! Remote peers — the local handle for one connected process.
//!
//! A [`RemotePeer`] sends `get`/`set` requests over its connection, keeps the
//! definitions it has received from that process, caches the interfaces built
//! from them, and tracks which contexts the process publishes.

use crate::context::Value;
use crate::interface::Interface;
use crate::marshal::{marshal_out, unmarshal, Origin};
use crate::netron::Netron;
use ferron_types::definition::Definition;
use ferron_types::error::{FerronError, FerronResult};
use ferron_wire::connection::{Connection, WireError};
use ferron_wire::message::{WireRequest, WireResponse};
use ferron_wire::registry::Direction;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Connection metadata of a peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub node_id: String,
    pub node_name: String,
    pub address: Option<SocketAddr>,
    pub protocol: String,
    pub direction: Direction,
}

#[derive(Debug, Default, Clone)]
struct Catalogue {
    contexts: BTreeMap<String, Definition>,
    closed: bool,
}

/// Handle for one connected process.
pub struct RemotePeer {
    info: PeerInfo,
    conn: Arc<Connection>,
    netron: Weak<Netron>,
    timeout: Duration,
    closed: AtomicBool,
    /// Definitions received from this peer, by id.
    defs: RwLock<HashMap<u64, Definition>>,
    interfaces: RwLock<HashMap<u64, Interface>>,
    catalogue: watch::Sender<Catalogue>,
}

impl RemotePeer {
    pub(crate) fn new(
        info: PeerInfo,
        conn: Arc<Connection>,
        netron: Weak<Netron>,
        timeout: Duration,
        contexts: BTreeMap<String, Definition>,
    ) -> Self {
        let defs = contexts.values().map(|d| (d.id, d.clone())).collect();
        let (catalogue, _) = watch::channel(Catalogue {
            contexts,
            closed: false,
        });
        Self {
            info,
            conn,
            netron,
            timeout,
            closed: AtomicBool::new(false),
            defs: RwLock::new(defs),
            interfaces: RwLock::new(HashMap::new()),
            catalogue,
        }
    }

    /// Remote node id.
    pub fn id(&self) -> &str {
        &self.info.node_id
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.conn.is_closed()
    }

    /// Number of calls to this peer still waiting for a response.
    pub fn active_requests(&self) -> usize {
        self.conn.pending_count()
    }

    pub(crate) fn netron(&self) -> FerronResult<Arc<Netron>> {
        self.netron
            .upgrade()
            .ok_or_else(|| FerronError::Internal("node has been dropped".into()))
    }

    fn ensure_open(&self) -> FerronResult<()> {
        if self.is_closed() {
            return Err(FerronError::PeerGone(self.id().to_string()));
        }
        Ok(())
    }

    fn definition(&self, def_id: u64) -> FerronResult<Definition> {
        let defs = self.defs.read().unwrap_or_else(|e| e.into_inner());
        defs.get(&def_id)
            .cloned()
            .ok_or(FerronError::UnknownDefinition(def_id))
    }

    fn wire_error(&self, err: WireError) -> FerronError {
        match err {
            WireError::ConnectionClosed => FerronError::PeerGone(self.id().to_string()),
            other => other.into(),
        }
    }

    /// Read a property or call a method on the peer's definition `def_id`.
    pub async fn get(self: &Arc<Self>, def_id: u64, name: &str, data: Value) -> FerronResult<Value> {
        self.ensure_open()?;
        let def = self.definition(def_id)?;
        if !def.has_member(name) {
            return Err(FerronError::NotExists(name.to_string()));
        }
        let netron = self.netron()?;
        let data = marshal_out(&netron, data, self, Origin::Call(def_id))?;
        debug!(peer = %self.id(), def_id, member = name, "Sending get");
        let response = self
            .conn
            .request(
                WireRequest::Get {
                    def_id,
                    name: name.to_string(),
                    data,
                },
                self.timeout,
            )
            .await
            .map_err(|e| self.wire_error(e))?;
        match response {
            WireResponse::Value { value } => unmarshal(&netron, value, self),
            WireResponse::Error { error } => Err(FerronError::from_remote(error)),
            other => Err(FerronError::Internal(format!(
                "unexpected response to get: {other:?}"
            ))),
        }
    }

    /// Write a property or call a method (result discarded) on `def_id`.
    pub async fn set(self: &Arc<Self>, def_id: u64, name: &str, data: Value) -> FerronResult<()> {
        self.ensure_open()?;
        let def = self.definition(def_id)?;
        let member = def
            .member(name)
            .ok_or_else(|| FerronError::NotExists(name.to_string()))?;
        if member.is_readonly() {
            return Err(FerronError::InvalidAccess(name.to_string()));
        }
        let netron = self.netron()?;
        let data = marshal_out(&netron, data, self, Origin::Call(def_id))?;
        debug!(peer = %self.id(), def_id, member = name, "Sending set");
        let response = self
            .conn
            .request(
                WireRequest::Set {
                    def_id,
                    name: name.to_string(),
                    data,
                },
                self.timeout,
            )
            .await
            .map_err(|e| self.wire_error(e))?;
        match response {
            WireResponse::Ack => Ok(()),
            WireResponse::Error { error } => Err(FerronError::from_remote(error)),
            other => Err(FerronError::Internal(format!(
                "unexpected response to set: {other:?}"
            ))),
        }
    }

    /// Alias of [`get`](Self::get) for methods.
    pub async fn call(self: &Arc<Self>, def_id: u64, method: &str, args: Vec<Value>) -> FerronResult<Value> {
        self.get(def_id, method, Value::List(args)).await
    }

    /// Alias of [`set`](Self::set) for methods.
    pub async fn call_void(self: &Arc<Self>, def_id: u64, method: &str, args: Vec<Value>) -> FerronResult<()> {
        self.set(def_id, method, Value::List(args)).await
    }

    /// Round-trip check; returns the peer's uptime in seconds.
    pub async fn ping(&self) -> FerronResult<u64> {
        self.ensure_open()?;
        match self
            .conn
            .request(WireRequest::Ping, self.timeout)
            .await
            .map_err(|e| self.wire_error(e))?
        {
            WireResponse::Pong { uptime_secs } => Ok(uptime_secs),
            WireResponse::Error { error } => Err(FerronError::from_remote(error)),
            other => Err(FerronError::Internal(format!(
                "unexpected response to ping: {other:?}"
            ))),
        }
    }

    /// Remember a definition received from this peer. Returns it unchanged.
    pub(crate) fn register_definition(&self, def: Definition) -> Definition {
        let mut defs = self.defs.write().unwrap_or_else(|e| e.into_inner());
        defs.insert(def.id, def.clone());
        def
    }

    pub(crate) fn cached_interface(&self, def_id: u64, build: impl FnOnce() -> Interface) -> Interface {
        let mut interfaces = self.interfaces.write().unwrap_or_else(|e| e.into_inner());
        interfaces.entry(def_id).or_insert_with(build).clone()
    }

    // -- remote context catalogue --

    pub fn has_context(&self, name: &str) -> bool {
        self.catalogue.borrow().contexts.contains_key(name)
    }

    pub fn has_contexts(&self) -> bool {
        !self.catalogue.borrow().contexts.is_empty()
    }

    pub fn context_names(&self) -> Vec<String> {
        self.catalogue.borrow().contexts.keys().cloned().collect()
    }

    /// Definition of the published context `name`.
    pub fn context_definition(&self, name: &str) -> Option<Definition> {
        self.catalogue.borrow().contexts.get(name).cloned()
    }

    /// Wait until the peer publishes `name`. Fails if the peer goes away first.
    pub async fn wait_for_context(&self, name: &str) -> FerronResult<()> {
        let mut rx = self.catalogue.subscribe();
        let catalogue = rx
            .wait_for(|c| c.closed || c.contexts.contains_key(name))
            .await
            .map_err(|_| FerronError::PeerGone(self.id().to_string()))?;
        if catalogue.contexts.contains_key(name) {
            Ok(())
        } else {
            Err(FerronError::PeerGone(self.id().to_string()))
        }
    }

    /// Proxy for the published context `name`.
    pub fn query_interface(self: &Arc<Self>, name: &str) -> FerronResult<Interface> {
        self.ensure_open()?;
        let def = self
            .context_definition(name)
            .ok_or_else(|| FerronError::NotExists(name.to_string()))?;
        self.query_interface_by_definition(def.id)
    }

    /// Proxy for any definition this peer has disclosed.
    pub fn query_interface_by_definition(self: &Arc<Self>, def_id: u64) -> FerronResult<Interface> {
        self.ensure_open()?;
        let def = self.definition(def_id)?;
        Ok(self.netron()?.interfaces().create(def, self))
    }

    /// Drop the cached proxy so the next lookup builds a fresh one.
    pub fn release_interface(&self, interface: &Interface) -> FerronResult<()> {
        if interface.peer_id() != self.id() {
            return Err(FerronError::InvalidArgument(format!(
                "interface belongs to peer '{}'",
                interface.peer_id()
            )));
        }
        let mut interfaces = self.interfaces.write().unwrap_or_else(|e| e.into_inner());
        if interfaces
            .get(&interface.def_id())
            .is_some_and(|cached| cached.ptr_eq(interface))
        {
            interfaces.remove(&interface.def_id());
        }
        Ok(())
    }

    pub(crate) fn context_attached(&self, name: &str, def: Definition) {
        self.register_definition(def.clone());
        self.catalogue.send_modify(|c| {
            c.contexts.insert(name.to_string(), def);
        });
    }

    pub(crate) fn context_detached(&self, name: &str) -> Option<Definition> {
        let mut removed = None;
        self.catalogue.send_modify(|c| {
            removed = c.contexts.remove(name);
        });
        if let Some(def) = &removed {
            let mut interfaces = self.interfaces.write().unwrap_or_else(|e| e.into_inner());
            interfaces.remove(&def.id);
        }
        removed
    }

    /// Close the connection. Cleanup runs when the connection's dispatch
    /// loop observes the close.
    pub fn disconnect(&self) {
        self.conn.close();
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Make the peer permanently unusable: pending calls fail, cached
    /// proxies are dropped, and waiters are released.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.conn.close();
        self.interfaces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.catalogue.send_modify(|c| c.closed = true);
    }
}

impl std::fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePeer")
            .field("id", &self.info.node_id)
            .field("name", &self.info.node_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
