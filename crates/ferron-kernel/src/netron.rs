//! Netron — the per-process manager of contexts, stubs, and peers.
//!
//! A [`Netron`] owns the stub registry, the attached (published) contexts and
//! the live set of remote peers. It turns handshaken streams into
//! [`RemotePeer`]s and serves their requests. Transport lifecycle (listening,
//! dialing) lives in [`NetCore`](crate::netcore::NetCore).

use crate::context::{context_key, Context};
use crate::events::{EventBus, NetronEvent};
use crate::interface::InterfaceFactory;
use crate::peer::{PeerInfo, RemotePeer};
use crate::stub::StubManager;
use ferron_types::config::NetronConfig;
use ferron_types::definition::Definition;
use ferron_types::error::{FerronError, FerronResult};
use ferron_types::id::IdGenerator;
use ferron_wire::connection::{handshake_inbound, handshake_outbound, Connection, Inbound};
use ferron_wire::message::{Hello, WireNotification, WireRequest, WireResponse, PROTOCOL_VERSION};
use ferron_wire::registry::{Direction, PeerEntry, PeerRegistry};
use ferron_wire::transport::{negotiate_inbound, negotiate_outbound, BoxStream};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-process manager of contexts and peers.
pub struct Netron {
    me: Weak<Netron>,
    config: NetronConfig,
    started_at: Instant,
    stubs: StubManager,
    interfaces: InterfaceFactory,
    /// Attached contexts: name -> top-level definition id.
    contexts: RwLock<BTreeMap<String, u64>>,
    peers: RwLock<HashMap<String, Arc<RemotePeer>>>,
    registry: PeerRegistry,
    events: EventBus,
}

impl Netron {
    pub fn new(config: NetronConfig) -> FerronResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            started_at: Instant::now(),
            stubs: StubManager::new(Arc::new(IdGenerator::new())),
            interfaces: InterfaceFactory::new(),
            contexts: RwLock::new(BTreeMap::new()),
            peers: RwLock::new(HashMap::new()),
            registry: PeerRegistry::new(),
            events: EventBus::new(),
        }))
    }

    pub fn config(&self) -> &NetronConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn stubs(&self) -> &StubManager {
        &self.stubs
    }

    pub fn interfaces(&self) -> &InterfaceFactory {
        &self.interfaces
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NetronEvent> {
        self.events.subscribe()
    }

    // -- attached contexts --

    /// Publish `instance` under `name` (its reflection name by default).
    /// Returns the definition id.
    pub fn attach_context(
        &self,
        instance: Arc<dyn Context>,
        name: Option<&str>,
    ) -> FerronResult<u64> {
        let stub = self.stubs.create_stub(instance)?;
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| stub.definition().name.clone());
        let def = stub.definition().clone();
        {
            let mut contexts = self.contexts.write().unwrap_or_else(|e| e.into_inner());
            if contexts.contains_key(&name) {
                return Err(FerronError::Exists(format!(
                    "Context '{name}' already attached"
                )));
            }
            contexts.insert(name.clone(), def.id);
            self.stubs.add_stub(stub);
        }

        info!(ctx = %name, def_id = def.id, "Context attached");
        self.broadcast(WireNotification::ContextAttached {
            ctx_id: name.clone(),
            definition: def.clone(),
        });
        self.events.publish(NetronEvent::ContextAttached {
            name,
            def_id: def.id,
        });
        Ok(def.id)
    }

    /// Withdraw the context `name`. Returns its definition id.
    pub fn detach_context(&self, name: &str, release_originated: bool) -> FerronResult<u64> {
        let def_id = {
            let mut contexts = self.contexts.write().unwrap_or_else(|e| e.into_inner());
            contexts
                .remove(name)
                .ok_or_else(|| FerronError::NotExists(format!("Context '{name}'")))?
        };
        let removed = self.stubs.delete_stub(def_id, release_originated);

        info!(ctx = %name, def_id, released = removed.len(), "Context detached");
        self.broadcast(WireNotification::ContextDetached {
            ctx_id: name.to_string(),
            def_id,
        });
        self.events.publish(NetronEvent::ContextDetached {
            name: name.to_string(),
            def_id,
        });
        Ok(def_id)
    }

    pub fn detach_all_contexts(&self, release_originated: bool) {
        for name in self.context_names() {
            if let Err(e) = self.detach_context(&name, release_originated) {
                debug!(ctx = %name, error = %e, "Context already detached");
            }
        }
    }

    pub fn has_context(&self, name: &str) -> bool {
        let contexts = self.contexts.read().unwrap_or_else(|e| e.into_inner());
        contexts.contains_key(name)
    }

    pub fn has_contexts(&self) -> bool {
        let contexts = self.contexts.read().unwrap_or_else(|e| e.into_inner());
        !contexts.is_empty()
    }

    pub fn context_names(&self) -> Vec<String> {
        let contexts = self.contexts.read().unwrap_or_else(|e| e.into_inner());
        contexts.keys().cloned().collect()
    }

    /// Definition of the attached context `name`.
    pub fn context_definition(&self, name: &str) -> Option<Definition> {
        let def_id = *self
            .contexts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)?;
        self.stubs.get_stub(def_id).map(|s| s.definition().clone())
    }

    fn published_definitions(&self) -> BTreeMap<String, Definition> {
        self.context_names()
            .into_iter()
            .filter_map(|name| {
                let def = self.context_definition(&name)?;
                Some((name, def))
            })
            .collect()
    }

    /// Drop every stub of `instance`; attached ones are detached first.
    /// Later calls against those definitions fail with `UnknownDefinition`.
    pub fn release_context(&self, instance: &Arc<dyn Context>, release_originated: bool) {
        let key = context_key(instance);
        let attached: Vec<String> = {
            let contexts = self.contexts.read().unwrap_or_else(|e| e.into_inner());
            contexts
                .iter()
                .filter(|(_, def_id)| {
                    self.stubs
                        .get_stub(**def_id)
                        .is_some_and(|s| context_key(s.instance()) == key)
                })
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in attached {
            if let Err(e) = self.detach_context(&name, release_originated) {
                debug!(ctx = %name, error = %e, "Context already detached");
            }
        }
        let removed = self.stubs.delete_stubs_by_key(key, release_originated);
        debug!(released = removed.len(), "Context released");
    }

    /// Definition of `instance` as disclosed to `peer_id`, created on first use.
    pub fn ref_context(
        &self,
        peer_id: &str,
        instance: Arc<dyn Context>,
        parent_id: u64,
    ) -> FerronResult<Definition> {
        let key = context_key(&instance);
        self.stubs.ref_context(
            peer_id,
            key,
            instance,
            crate::marshal::Origin::Stub(parent_id),
        )
    }

    // -- peers --

    pub fn peer(&self, node_id: &str) -> Option<Arc<RemotePeer>> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(node_id).cloned()
    }

    pub fn peers(&self) -> Vec<Arc<RemotePeer>> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.values().cloned().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Close the connection to `node_id`.
    pub fn disconnect_peer(&self, node_id: &str) -> FerronResult<()> {
        let peer = self
            .peer(node_id)
            .ok_or_else(|| FerronError::NotExists(format!("Peer '{node_id}'")))?;
        self.teardown(&peer);
        Ok(())
    }

    /// Tell every peer we are leaving, then close all connections.
    pub fn disconnect_all(&self) {
        for peer in self.peers() {
            if let Err(e) = peer.connection().notify(WireNotification::ShuttingDown) {
                debug!(peer = %peer.id(), error = %e, "Could not announce shutdown");
            }
            self.teardown(&peer);
        }
    }

    fn local_hello(&self) -> Hello {
        Hello {
            node_id: self.config.node_id.clone(),
            node_name: self.config.node_name.clone(),
            protocol_version: PROTOCOL_VERSION,
            contexts: self.published_definitions(),
        }
    }

    /// Serve an inbound stream: negotiate the protocol, answer the handshake,
    /// and register the peer.
    pub async fn accept_stream(
        &self,
        mut stream: BoxStream,
        addr: Option<SocketAddr>,
    ) -> FerronResult<Arc<RemotePeer>> {
        let max = self.config.max_message_size;
        let protocol =
            negotiate_inbound(&mut stream, &[self.config.protocol_id.clone()], max).await?;
        let remote = handshake_inbound(&mut stream, self.local_hello(), max).await?;
        self.register_peer(stream, remote, addr, protocol, Direction::Inbound)
    }

    /// Open a session on a dialed stream: negotiate one of `protocols`, send
    /// the handshake, and register the peer.
    pub async fn open_stream(
        &self,
        mut stream: BoxStream,
        addr: Option<SocketAddr>,
        protocols: &[String],
    ) -> FerronResult<Arc<RemotePeer>> {
        let max = self.config.max_message_size;
        let protocol = negotiate_outbound(&mut stream, protocols, max).await?;
        self.establish(stream, addr, protocol).await
    }

    /// Handshake on an already negotiated outbound stream.
    pub(crate) async fn establish(
        &self,
        mut stream: BoxStream,
        addr: Option<SocketAddr>,
        protocol: String,
    ) -> FerronResult<Arc<RemotePeer>> {
        let max = self.config.max_message_size;
        let remote = handshake_outbound(&mut stream, self.local_hello(), max).await?;
        self.register_peer(stream, remote, addr, protocol, Direction::Outbound)
    }

    fn register_peer(
        &self,
        stream: BoxStream,
        remote: Hello,
        addr: Option<SocketAddr>,
        protocol: String,
        direction: Direction,
    ) -> FerronResult<Arc<RemotePeer>> {
        if remote.node_id == self.config.node_id {
            return Err(FerronError::Connection("refusing to connect to self".into()));
        }
        let (conn, inbound) =
            Connection::spawn(stream, remote.node_id.clone(), self.config.max_message_size);

        let info = PeerInfo {
            node_id: remote.node_id.clone(),
            node_name: remote.node_name.clone(),
            address: addr,
            protocol: protocol.clone(),
            direction,
        };
        let peer = Arc::new(RemotePeer::new(
            info,
            conn,
            self.me.clone(),
            self.config.response_timeout(),
            remote.contexts.clone(),
        ));

        {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = peers.get(&remote.node_id) {
                if !existing.is_closed() {
                    peer.connection().close();
                    return match direction {
                        Direction::Outbound => Ok(Arc::clone(existing)),
                        Direction::Inbound => Err(FerronError::Exists(format!(
                            "Peer '{}' already connected",
                            remote.node_id
                        ))),
                    };
                }
            }
            peers.insert(remote.node_id.clone(), Arc::clone(&peer));
        }

        self.registry.add_peer(PeerEntry {
            node_id: remote.node_id.clone(),
            node_name: remote.node_name.clone(),
            address: addr,
            protocol,
            direction,
            connected_at: chrono::Utc::now(),
            protocol_version: remote.protocol_version,
            contexts: remote.contexts.keys().cloned().collect(),
        });

        info!(
            peer = %remote.node_id,
            name = %remote.node_name,
            contexts = remote.contexts.len(),
            ?direction,
            "Peer connected"
        );
        self.events.publish(NetronEvent::PeerConnected {
            peer_id: remote.node_id,
            node_name: remote.node_name,
        });

        tokio::spawn(dispatch_loop(self.me.clone(), Arc::clone(&peer), inbound));
        Ok(peer)
    }

    /// Remove a peer and everything bound to it. Safe to call more than once.
    fn teardown(&self, peer: &Arc<RemotePeer>) {
        peer.mark_closed();
        let removed = {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            match peers.get(peer.id()) {
                Some(current) if Arc::ptr_eq(current, peer) => {
                    peers.remove(peer.id());
                    self.registry.remove_peer(peer.id());
                    true
                }
                _ => false,
            }
        };
        if !removed {
            return;
        }
        let released = self.stubs.delete_peer_stubs(peer.id());
        info!(peer = %peer.id(), released, "Peer disconnected");
        self.events.publish(NetronEvent::PeerDisconnected {
            peer_id: peer.id().to_string(),
        });
    }

    fn broadcast(&self, notification: WireNotification) {
        for peer in self.peers() {
            if let Err(e) = peer.connection().notify(notification.clone()) {
                warn!(peer = %peer.id(), error = %e, "Failed to deliver notification");
            }
        }
    }

    async fn serve_request(&self, peer: &Arc<RemotePeer>, request: WireRequest) -> WireResponse {
        let result = match request {
            WireRequest::Get { def_id, name, data } => match self.stubs.get_stub(def_id) {
                Some(stub) => stub
                    .get(&name, data, peer)
                    .await
                    .map(|value| WireResponse::Value { value }),
                None => Err(FerronError::UnknownDefinition(def_id)),
            },
            WireRequest::Set { def_id, name, data } => match self.stubs.get_stub(def_id) {
                Some(stub) => stub.set(&name, data, peer).await.map(|()| WireResponse::Ack),
                None => Err(FerronError::UnknownDefinition(def_id)),
            },
            WireRequest::Ping => Ok(WireResponse::Pong {
                uptime_secs: self.uptime_secs(),
            }),
            WireRequest::Handshake(_) => Err(FerronError::InvalidArgument(
                "handshake already completed".into(),
            )),
        };
        result.unwrap_or_else(|e| {
            debug!(peer = %peer.id(), error = %e, "Request failed");
            WireResponse::Error {
                error: e.to_remote(),
            }
        })
    }

    fn handle_notification(&self, peer: &Arc<RemotePeer>, notification: WireNotification) {
        match notification {
            WireNotification::ContextAttached { ctx_id, definition } => {
                info!(peer = %peer.id(), ctx = %ctx_id, "Remote context attached");
                peer.context_attached(&ctx_id, definition.clone());
                self.registry.add_context(peer.id(), &ctx_id);
                self.events.publish(NetronEvent::RemoteContextAttached {
                    peer_id: peer.id().to_string(),
                    name: ctx_id,
                    definition,
                });
            }
            WireNotification::ContextDetached { ctx_id, def_id } => {
                info!(peer = %peer.id(), ctx = %ctx_id, "Remote context detached");
                peer.context_detached(&ctx_id);
                self.registry.remove_context(peer.id(), &ctx_id);
                self.events.publish(NetronEvent::RemoteContextDetached {
                    peer_id: peer.id().to_string(),
                    name: ctx_id,
                    def_id,
                });
            }
            WireNotification::ShuttingDown => {
                info!(peer = %peer.id(), "Peer is shutting down");
                self.teardown(peer);
            }
        }
    }
}

impl std::fmt::Debug for Netron {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Netron")
            .field("node_id", &self.config.node_id)
            .field("contexts", &self.context_names())
            .field("peers", &self.peer_count())
            .finish()
    }
}

/// Serve one peer's inbound traffic until its connection closes. Every
/// request runs on its own task so a handler may call back into the peer.
async fn dispatch_loop(
    netron: Weak<Netron>,
    peer: Arc<RemotePeer>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(msg) = inbound.recv().await {
        let Some(node) = netron.upgrade() else {
            break;
        };
        match msg {
            Inbound::Request { id, request } => {
                let peer = Arc::clone(&peer);
                tokio::spawn(async move {
                    let response = node.serve_request(&peer, request).await;
                    if let Err(e) = peer.connection().respond(id, response) {
                        debug!(peer = %peer.id(), id, error = %e, "Could not send response");
                    }
                });
            }
            Inbound::Notification(notification) => {
                node.handle_notification(&peer, notification);
            }
        }
    }
    if let Some(node) = netron.upgrade() {
        node.teardown(&peer);
    } else {
        peer.mark_closed();
    }
}
