//! Interfaces — client-side proxies generated from received definitions.
//!
//! An [`Interface`] is a dispatch table built once per definition: every
//! member name maps to an invocable that forwards to the owning peer's
//! `get`/`set`. Interfaces are cached per peer and definition id, so two
//! lookups of the same pair yield the same proxy.

use crate::context::{Context, Reflection, Value};
use crate::peer::RemotePeer;
use async_trait::async_trait;
use ferron_types::definition::{Definition, MemberMeta};
use ferron_types::error::{FerronError, FerronResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// How a member is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocable {
    Method,
    Property { readonly: bool },
}

struct InterfaceInner {
    def: Definition,
    peer: Weak<RemotePeer>,
    peer_id: String,
    members: BTreeMap<String, Invocable>,
}

/// Proxy for a context owned by a remote peer. Cloning is cheap and keeps
/// identity: clones compare equal under [`Interface::ptr_eq`].
#[derive(Clone)]
pub struct Interface {
    inner: Arc<InterfaceInner>,
}

impl Interface {
    fn build(def: Definition, peer: &Arc<RemotePeer>) -> Self {
        let members = def
            .members
            .iter()
            .map(|(name, meta)| {
                let invocable = match meta {
                    MemberMeta::Method(_) => Invocable::Method,
                    MemberMeta::Property(p) => Invocable::Property {
                        readonly: p.readonly,
                    },
                };
                (name.clone(), invocable)
            })
            .collect();
        Self {
            inner: Arc::new(InterfaceInner {
                peer_id: peer.id().to_string(),
                peer: Arc::downgrade(peer),
                def,
                members,
            }),
        }
    }

    pub fn def_id(&self) -> u64 {
        self.inner.def.id
    }

    /// Node id of the peer that owns the proxied object.
    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    pub fn definition(&self) -> &Definition {
        &self.inner.def
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, Invocable)> {
        self.inner.members.iter().map(|(n, i)| (n.as_str(), *i))
    }

    /// Whether both handles are the same proxy.
    pub fn ptr_eq(&self, other: &Interface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    fn peer(&self) -> FerronResult<Arc<RemotePeer>> {
        self.inner
            .peer
            .upgrade()
            .ok_or_else(|| FerronError::PeerGone(self.inner.peer_id.clone()))
    }

    fn invocable(&self, name: &str) -> FerronResult<Invocable> {
        self.inner
            .members
            .get(name)
            .copied()
            .ok_or_else(|| FerronError::NotExists(name.to_string()))
    }

    /// Call a method and wait for its result.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> FerronResult<Value> {
        self.method(method)?.call(args).await
    }

    /// Call a method, discarding its result.
    pub async fn call_void(&self, method: &str, args: Vec<Value>) -> FerronResult<()> {
        self.method(method)?.call_void(args).await
    }

    /// Read a property; `default` is returned when the remote value is undefined.
    pub async fn get(&self, property: &str, default: Value) -> FerronResult<Value> {
        self.property(property)?.get(default).await
    }

    pub async fn set(&self, property: &str, value: Value) -> FerronResult<()> {
        self.property(property)?.set(value).await
    }

    /// Handle for the method `name`.
    pub fn method(&self, name: &str) -> FerronResult<MethodHandle<'_>> {
        match self.invocable(name)? {
            Invocable::Method => Ok(MethodHandle { iface: self, name: name.to_string() }),
            Invocable::Property { .. } => Err(FerronError::InvalidArgument(format!(
                "'{name}' is a property, not a method"
            ))),
        }
    }

    /// Handle for the property `name`.
    pub fn property(&self, name: &str) -> FerronResult<PropertyHandle<'_>> {
        match self.invocable(name)? {
            Invocable::Property { readonly } => Ok(PropertyHandle {
                iface: self,
                name: name.to_string(),
                readonly,
            }),
            Invocable::Method => Err(FerronError::InvalidArgument(format!(
                "'{name}' is a method, not a property"
            ))),
        }
    }
}

/// A bound method of an [`Interface`].
pub struct MethodHandle<'a> {
    iface: &'a Interface,
    name: String,
}

impl MethodHandle<'_> {
    pub async fn call(&self, args: Vec<Value>) -> FerronResult<Value> {
        let peer = self.iface.peer()?;
        peer.get(self.iface.def_id(), &self.name, Value::List(args))
            .await
    }

    pub async fn call_void(&self, args: Vec<Value>) -> FerronResult<()> {
        let peer = self.iface.peer()?;
        peer.set(self.iface.def_id(), &self.name, Value::List(args))
            .await
    }

    /// `<type> name(<argType> argName, ...)`
    pub fn signature(&self) -> String {
        self.iface
            .definition()
            .method_signature(&self.name)
            .unwrap_or_default()
    }
}

/// A bound property accessor pair of an [`Interface`].
pub struct PropertyHandle<'a> {
    iface: &'a Interface,
    name: String,
    readonly: bool,
}

impl PropertyHandle<'_> {
    pub async fn get(&self, default: Value) -> FerronResult<Value> {
        let peer = self.iface.peer()?;
        peer.get(self.iface.def_id(), &self.name, default).await
    }

    pub async fn set(&self, value: Value) -> FerronResult<()> {
        if self.readonly {
            return Err(FerronError::InvalidAccess(self.name.clone()));
        }
        let peer = self.iface.peer()?;
        peer.set(self.iface.def_id(), &self.name, value).await
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

/// A proxy is itself exposable, so it can be handed on to a third peer.
#[async_trait]
impl Context for Interface {
    fn reflect(&self) -> Reflection {
        Reflection::from_definition(self.definition())
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> FerronResult<Value> {
        Interface::call(self, method, args).await
    }

    async fn get(&self, property: &str) -> FerronResult<Option<Value>> {
        let value = Interface::get(self, property, Value::Null).await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn set(&self, property: &str, value: Value) -> FerronResult<()> {
        Interface::set(self, property, value).await
    }

    fn as_interface(&self) -> Option<Interface> {
        Some(self.clone())
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.inner.def.name)
            .field("def_id", &self.inner.def.id)
            .field("peer_id", &self.inner.peer_id)
            .finish()
    }
}

/// Builds interfaces, reusing the peer's cached proxy when one exists.
#[derive(Debug, Default)]
pub struct InterfaceFactory;

impl InterfaceFactory {
    pub fn new() -> Self {
        Self
    }

    /// Proxy for `def` owned by `peer`. Repeated calls for the same
    /// `(peer, def.id)` return the same interface.
    pub fn create(&self, def: Definition, peer: &Arc<RemotePeer>) -> Interface {
        peer.cached_interface(def.id, || Interface::build(def.clone(), peer))
    }
}
