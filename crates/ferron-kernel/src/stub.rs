//! Stubs — server-side bindings of one context instance to one definition.
//!
//! A [`Stub`] dispatches incoming `get`/`set` invocations into its context and
//! marshals arguments and results. The [`StubManager`] owns every stub of a
//! node, keyed by definition id, plus the per-peer index used to hand the same
//! definition back when an object is disclosed to a peer more than once.

use crate::context::{context_key, Context, Reflection, Value};
use crate::marshal::{marshal_out, unmarshal, unmarshal_args, Origin};
use crate::peer::RemotePeer;
use ferron_types::definition::{Definition, ROOT_PARENT_ID};
use ferron_types::error::{FerronError, FerronResult};
use ferron_types::id::IdGenerator;
use ferron_types::value::WireValue;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

/// Binds exactly one context instance to exactly one definition.
pub struct Stub {
    instance: Arc<dyn Context>,
    key: usize,
    reflection: Reflection,
    parent_id: u64,
    peer_id: Option<String>,
    /// Local stub whose call produced this one, if any.
    originated_from: Option<u64>,
    ids: Arc<IdGenerator>,
    definition: OnceLock<Definition>,
}

impl Stub {
    fn new(
        instance: Arc<dyn Context>,
        key: usize,
        origin: Option<Origin>,
        peer_id: Option<String>,
        ids: Arc<IdGenerator>,
    ) -> FerronResult<Self> {
        let reflection = instance.reflect();
        reflection.validate()?;
        Ok(Self {
            instance,
            key,
            reflection,
            parent_id: origin.map_or(ROOT_PARENT_ID, Origin::parent_id),
            peer_id,
            originated_from: origin.and_then(Origin::stub),
            ids,
            definition: OnceLock::new(),
        })
    }

    /// This stub's definition, built on first access. Every call returns the
    /// same definition (same id).
    pub fn definition(&self) -> &Definition {
        self.definition.get_or_init(|| Definition {
            id: self.ids.next(),
            parent_id: self.parent_id,
            peer_id: self.peer_id.clone(),
            name: self.reflection.name.clone(),
            description: self.reflection.description.clone(),
            twin: self.reflection.twin.clone(),
            members: self.reflection.members.clone(),
        })
    }

    pub fn instance(&self) -> &Arc<dyn Context> {
        &self.instance
    }

    /// The instance as a value; proxies come back as interfaces.
    pub fn instance_value(&self) -> Value {
        match self.instance.as_interface() {
            Some(interface) => Value::Interface(interface),
            None => Value::Context(Arc::clone(&self.instance)),
        }
    }

    /// Peer this stub's definition was disclosed to, if it came from marshaling.
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    /// Write a property, or call a method and discard its result.
    pub async fn set(
        &self,
        name: &str,
        data: WireValue,
        peer: &Arc<RemotePeer>,
    ) -> FerronResult<()> {
        let def = self.definition();
        let member = def
            .member(name)
            .ok_or_else(|| FerronError::NotExists(name.to_string()))?;
        if member.is_readonly() {
            return Err(FerronError::InvalidAccess(name.to_string()));
        }
        let netron = peer.netron()?;
        if member.is_method() {
            let args = unmarshal_args(&netron, data, peer)?;
            debug!(def_id = def.id, method = name, "Invoking method (void)");
            self.instance.call(name, args).await?;
        } else {
            let value = unmarshal(&netron, data, peer)?;
            debug!(def_id = def.id, property = name, "Assigning property");
            self.instance.set(name, value).await?;
        }
        Ok(())
    }

    /// Read a property, or call a method and return its marshaled result.
    /// An undefined property yields `default` instead.
    pub async fn get(
        &self,
        name: &str,
        default: WireValue,
        peer: &Arc<RemotePeer>,
    ) -> FerronResult<WireValue> {
        let def = self.definition();
        let member = def
            .member(name)
            .ok_or_else(|| FerronError::NotExists(name.to_string()))?;
        let netron = peer.netron()?;
        let origin = Origin::Stub(def.id);
        if member.is_method() {
            let args = unmarshal_args(&netron, default, peer)?;
            debug!(def_id = def.id, method = name, "Invoking method");
            let result = self.instance.call(name, args).await?;
            return marshal_out(&netron, result, peer, origin);
        }
        match self.instance.get(name).await? {
            Some(value) => marshal_out(&netron, value, peer, origin),
            None => {
                let fallback = unmarshal(&netron, default, peer)?;
                marshal_out(&netron, fallback, peer, origin)
            }
        }
    }
}

impl std::fmt::Debug for Stub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stub")
            .field("name", &self.reflection.name)
            .field("definition", &self.definition.get().map(|d| d.id))
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

/// Registry of every stub on a node.
pub struct StubManager {
    ids: Arc<IdGenerator>,
    stubs: RwLock<HashMap<u64, Arc<Stub>>>,
    /// peer id -> instance key -> definition id
    peer_stubs: RwLock<HashMap<String, HashMap<usize, u64>>>,
}

impl StubManager {
    pub fn new(ids: Arc<IdGenerator>) -> Self {
        Self {
            ids,
            stubs: RwLock::new(HashMap::new()),
            peer_stubs: RwLock::new(HashMap::new()),
        }
    }

    /// Build a stub for a top-level context. Not registered until [`add_stub`](Self::add_stub).
    pub fn create_stub(&self, instance: Arc<dyn Context>) -> FerronResult<Arc<Stub>> {
        let key = context_key(&instance);
        Ok(Arc::new(Stub::new(
            instance,
            key,
            None,
            None,
            Arc::clone(&self.ids),
        )?))
    }

    pub fn add_stub(&self, stub: Arc<Stub>) -> u64 {
        let id = stub.definition().id;
        let mut stubs = self.stubs.write().unwrap_or_else(|e| e.into_inner());
        stubs.insert(id, stub);
        id
    }

    pub fn get_stub(&self, def_id: u64) -> Option<Arc<Stub>> {
        let stubs = self.stubs.read().unwrap_or_else(|e| e.into_inner());
        stubs.get(&def_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.stubs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Definition of `instance` as disclosed to `peer_id`. The first
    /// disclosure creates and registers a stub; later ones return the same
    /// definition.
    pub(crate) fn ref_context(
        &self,
        peer_id: &str,
        key: usize,
        instance: Arc<dyn Context>,
        origin: Origin,
    ) -> FerronResult<Definition> {
        let mut peer_stubs = self.peer_stubs.write().unwrap_or_else(|e| e.into_inner());
        let known = peer_stubs.entry(peer_id.to_string()).or_default();
        if let Some(def_id) = known.get(&key) {
            if let Some(stub) = self.get_stub(*def_id) {
                return Ok(stub.definition().clone());
            }
        }

        let stub = Arc::new(Stub::new(
            instance,
            key,
            Some(origin),
            Some(peer_id.to_string()),
            Arc::clone(&self.ids),
        )?);
        let def = stub.definition().clone();
        self.add_stub(stub);
        known.insert(key, def.id);
        debug!(peer = %peer_id, def_id = def.id, parent_id = def.parent_id, "Disclosed context");
        Ok(def)
    }

    /// Remove one stub. With `release_originated`, every stub produced
    /// (transitively) by calls on it goes too. Returns the removed ids.
    pub fn delete_stub(&self, def_id: u64, release_originated: bool) -> Vec<u64> {
        let mut peer_stubs = self.peer_stubs.write().unwrap_or_else(|e| e.into_inner());
        let mut stubs = self.stubs.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = Vec::new();
        let mut queue = vec![def_id];
        while let Some(id) = queue.pop() {
            if stubs.remove(&id).is_none() {
                continue;
            }
            removed.push(id);
            if release_originated {
                queue.extend(
                    stubs
                        .iter()
                        .filter(|(_, s)| s.originated_from == Some(id))
                        .map(|(child, _)| *child),
                );
            }
        }
        prune_peer_index(&mut peer_stubs, &removed);
        removed
    }

    /// Remove every stub bound to `instance`.
    pub fn delete_stubs_for_context(
        &self,
        instance: &Arc<dyn Context>,
        release_originated: bool,
    ) -> Vec<u64> {
        let key = context_key(instance);
        self.delete_stubs_by_key(key, release_originated)
    }

    pub(crate) fn delete_stubs_by_key(&self, key: usize, release_originated: bool) -> Vec<u64> {
        let ids: Vec<u64> = {
            let stubs = self.stubs.read().unwrap_or_else(|e| e.into_inner());
            stubs
                .iter()
                .filter(|(_, s)| s.key == key)
                .map(|(id, _)| *id)
                .collect()
        };
        ids.into_iter()
            .flat_map(|id| self.delete_stub(id, release_originated))
            .collect()
    }

    /// Remove every stub disclosed to `peer_id`.
    pub fn delete_peer_stubs(&self, peer_id: &str) -> usize {
        let mut peer_stubs = self.peer_stubs.write().unwrap_or_else(|e| e.into_inner());
        let mut stubs = self.stubs.write().unwrap_or_else(|e| e.into_inner());
        peer_stubs.remove(peer_id);
        let before = stubs.len();
        stubs.retain(|_, s| s.peer_id.as_deref() != Some(peer_id));
        before - stubs.len()
    }
}

fn prune_peer_index(peer_stubs: &mut HashMap<String, HashMap<usize, u64>>, removed: &[u64]) {
    if removed.is_empty() {
        return;
    }
    for known in peer_stubs.values_mut() {
        known.retain(|_, id| !removed.contains(id));
    }
    peer_stubs.retain(|_, known| !known.is_empty());
}
