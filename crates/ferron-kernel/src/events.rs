//! Node events — lifecycle notifications fanned out to subscribers.

use ferron_types::definition::Definition;
use tokio::sync::broadcast;
use tracing::debug;

/// Something that happened on this node or on a connected peer.
#[derive(Debug, Clone)]
pub enum NetronEvent {
    PeerConnected { peer_id: String, node_name: String },
    PeerDisconnected { peer_id: String },
    /// A local context was attached.
    ContextAttached { name: String, def_id: u64 },
    /// A local context was detached.
    ContextDetached { name: String, def_id: u64 },
    /// A connected peer published a context.
    RemoteContextAttached {
        peer_id: String,
        name: String,
        definition: Definition,
    },
    /// A connected peer withdrew a context.
    RemoteContextDetached {
        peer_id: String,
        name: String,
        def_id: u64,
    },
}

/// Broadcast fan-out for [`NetronEvent`]s. Publishing never blocks; slow
/// subscribers observe `Lagged`.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<NetronEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    pub fn publish(&self, event: NetronEvent) {
        debug!(?event, "Publishing event");
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetronEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
