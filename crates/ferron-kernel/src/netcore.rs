//! NetCore — owns the transport node and the peer connection lifecycle.
//!
//! Node state moves `Idle -> Starting -> Started` under a single lock; a
//! `start` issued while the node is starting or started is a no-op. Outbound
//! dials are serialized per target address and deduplicated by peer identity,
//! so connecting twice to the same node yields the same [`RemotePeer`].

use crate::netron::Netron;
use crate::peer::RemotePeer;
use dashmap::DashMap;
use ferron_types::error::{FerronError, FerronResult};
use ferron_wire::transport::{dial_protocol, Listener, TcpTransport, Transport};
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state of the transport node.
#[derive(Debug)]
pub enum NodeState {
    Idle,
    Starting,
    Started {
        local_addr: SocketAddr,
        accept_task: JoinHandle<()>,
    },
}

/// Transport node of one process.
pub struct NetCore {
    netron: Arc<Netron>,
    transport: Arc<dyn Transport>,
    state: Mutex<NodeState>,
    /// One dial at a time per target address.
    dialing: DashMap<SocketAddr, Arc<tokio::sync::Mutex<()>>>,
}

impl NetCore {
    /// A node using TCP.
    pub fn new(netron: Arc<Netron>) -> Self {
        Self::with_transport(netron, Arc::new(TcpTransport))
    }

    pub fn with_transport(netron: Arc<Netron>, transport: Arc<dyn Transport>) -> Self {
        Self {
            netron,
            transport,
            state: Mutex::new(NodeState::Idle),
            dialing: DashMap::new(),
        }
    }

    pub fn netron(&self) -> &Arc<Netron> {
        &self.netron
    }

    pub fn is_started(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            NodeState::Started { .. }
        )
    }

    /// Bound listener address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            NodeState::Started { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    /// Bring up the listener on `addr` (the configured address when `None`)
    /// and dial the configured bootstrap peers. A no-op while starting or
    /// started. Bind failures return the node to idle.
    pub async fn start(&self, addr: Option<SocketAddr>) -> FerronResult<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(*state, NodeState::Idle) {
                debug!("Node already starting or started");
                return Ok(());
            }
            *state = NodeState::Starting;
        }

        let addr = addr.unwrap_or(self.netron.config().listen_addr);
        let listener = match self.transport.listen(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.lock().unwrap_or_else(|e| e.into_inner()) = NodeState::Idle;
                return Err(FerronError::Connection(format!("listen on {addr}: {e}")));
            }
        };
        let local_addr = listener.local_addr();
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&self.netron)));
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = NodeState::Started {
            local_addr,
            accept_task,
        };
        info!(
            addr = %local_addr,
            node_id = %self.netron.node_id(),
            protocol = %self.netron.config().protocol_id,
            "Node started"
        );

        let bootstrap = self.netron.config().bootstrap.clone();
        let results = join_all(bootstrap.iter().map(|addr| self.connect(*addr))).await;
        for (peer_addr, result) in bootstrap.iter().zip(results) {
            match result {
                Ok(peer) => info!(addr = %peer_addr, peer = %peer.id(), "Bootstrap peer connected"),
                Err(e) => warn!(addr = %peer_addr, error = %e, "Bootstrap peer unreachable"),
            }
        }
        Ok(())
    }

    /// Stop listening and close every peer connection.
    pub async fn stop(&self) -> FerronResult<()> {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, NodeState::Starting) {
                return Err(FerronError::InvalidArgument("node is still starting".into()));
            }
            std::mem::replace(&mut *state, NodeState::Idle)
        };
        if let NodeState::Started {
            accept_task,
            local_addr,
        } = previous
        {
            accept_task.abort();
            info!(addr = %local_addr, "Node stopped");
        }
        self.netron.disconnect_all();
        Ok(())
    }

    /// Connect to the node at `addr` using the configured protocol id.
    pub async fn connect(&self, addr: SocketAddr) -> FerronResult<Arc<RemotePeer>> {
        let protocols = vec![self.netron.config().protocol_id.clone()];
        self.connect_with_protocols(addr, &protocols).await
    }

    /// Connect to `addr`, negotiating one of `protocols`. Returns the existing
    /// peer if that node is already connected.
    pub async fn connect_with_protocols(
        &self,
        addr: SocketAddr,
        protocols: &[String],
    ) -> FerronResult<Arc<RemotePeer>> {
        if let Some(peer) = self.known_peer(addr) {
            return Ok(peer);
        }

        let gate = self
            .dialing
            .entry(addr)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let result: FerronResult<Arc<RemotePeer>> = async {
            let _guard = gate.lock().await;
            if let Some(peer) = self.known_peer(addr) {
                return Ok(peer);
            }

            debug!(%addr, "Dialing");
            let (stream, protocol) = dial_protocol(
                self.transport.as_ref(),
                addr,
                protocols,
                self.netron.config().max_message_size,
            )
            .await
            .map_err(|e| FerronError::Connection(format!("dial {addr}: {e}")))?;
            self.netron.establish(stream, Some(addr), protocol).await
        }
        .await;
        // The last dialer out removes the gate.
        drop(gate);
        self.dialing
            .remove_if(&addr, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    /// Number of addresses with a dial in progress.
    pub fn pending_dials(&self) -> usize {
        self.dialing.len()
    }

    fn known_peer(&self, addr: SocketAddr) -> Option<Arc<RemotePeer>> {
        let entry = self.netron.registry().find_by_address(addr)?;
        self.netron
            .peer(&entry.node_id)
            .filter(|peer| !peer.is_closed())
    }

    /// Close the connection to one peer.
    pub fn disconnect(&self, peer: &RemotePeer) -> FerronResult<()> {
        self.netron.disconnect_peer(peer.id())
    }
}

/// Accept inbound streams until the task is aborted. Each stream is
/// negotiated and handshaken on its own task.
async fn accept_loop(mut listener: Box<dyn Listener>, netron: Arc<Netron>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let netron = Arc::clone(&netron);
                tokio::spawn(async move {
                    if let Err(e) = netron.accept_stream(stream, Some(addr)).await {
                        warn!(%addr, error = %e, "Inbound connection rejected");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
