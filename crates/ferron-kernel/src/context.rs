//! Contexts — local objects exposed for remote access — and the values
//! their members exchange.
//!
//! A type becomes remotely exposable by implementing [`Context`]. Its
//! [`Context::reflect`] method plays the role of the reflection provider: it
//! describes the methods and properties the type is willing to serve.

use crate::interface::Interface;
use async_trait::async_trait;
use ferron_types::definition::{Definition, MemberMeta, MethodMeta, PropertyMeta};
use ferron_types::error::{FerronError, FerronResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A local object explicitly exposed for remote access.
#[async_trait]
pub trait Context: Send + Sync + 'static {
    /// Describe the remotely visible surface of this object.
    fn reflect(&self) -> Reflection;

    /// Invoke the method `method`.
    async fn call(&self, method: &str, args: Vec<Value>) -> FerronResult<Value>;

    /// Read the property `property`. `Ok(None)` means "undefined", which lets a
    /// caller-supplied default take over.
    async fn get(&self, property: &str) -> FerronResult<Option<Value>>;

    /// Assign the property `property`.
    async fn set(&self, property: &str, value: Value) -> FerronResult<()>;

    /// Proxies return themselves here so marshaling can recognise them.
    fn as_interface(&self) -> Option<Interface> {
        None
    }
}

/// Member metadata produced by [`Context::reflect`].
#[derive(Debug, Clone, Default)]
pub struct Reflection {
    pub name: String,
    pub description: String,
    pub twin: Option<String>,
    pub members: BTreeMap<String, MemberMeta>,
    conflicts: Vec<String>,
}

impl Reflection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Name a statically known client-side override type.
    pub fn twin(mut self, twin: impl Into<String>) -> Self {
        self.twin = Some(twin.into());
        self
    }

    pub fn method(self, name: impl Into<String>, meta: MethodMeta) -> Self {
        self.member(name.into(), MemberMeta::Method(meta.normalized()))
    }

    pub fn property(self, name: impl Into<String>, meta: PropertyMeta) -> Self {
        self.member(name.into(), MemberMeta::Property(meta))
    }

    /// The surface described by a received definition.
    pub(crate) fn from_definition(def: &Definition) -> Self {
        Self {
            name: def.name.clone(),
            description: def.description.clone(),
            twin: def.twin.clone(),
            members: def.members.clone(),
            conflicts: Vec::new(),
        }
    }

    fn member(mut self, name: String, meta: MemberMeta) -> Self {
        if self.members.insert(name.clone(), meta).is_some() {
            self.conflicts.push(name);
        }
        self
    }

    /// Reject descriptions that cannot be turned into a definition.
    pub fn validate(&self) -> FerronResult<()> {
        if self.name.trim().is_empty() {
            return Err(FerronError::NotAContext("context has no name".into()));
        }
        if self.members.keys().any(|m| m.trim().is_empty()) {
            return Err(FerronError::NotAContext(format!(
                "'{}' has a member without a name",
                self.name
            )));
        }
        if let Some(name) = self.conflicts.first() {
            return Err(FerronError::NotAContext(format!(
                "'{}' declares member '{name}' more than once",
                self.name
            )));
        }
        Ok(())
    }
}

/// A value passed to or returned from a context member.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A local object; disclosed to the receiver as a definition.
    Context(Arc<dyn Context>),
    /// A proxy for an object owned by some peer.
    Interface(Interface),
    /// An ordered group of objects; disclosed as a definitions sequence.
    Contexts(Vec<Value>),
}

/// Identity of a context instance, usable as a map key. A proxy is keyed by
/// the interface it wraps, however many times it has been boxed.
pub(crate) fn context_key(ctx: &Arc<dyn Context>) -> usize {
    match ctx.as_interface() {
        Some(interface) => interface.key(),
        None => Arc::as_ptr(ctx) as *const () as usize,
    }
}

impl Value {
    pub fn context<C: Context>(ctx: C) -> Self {
        Value::Context(Arc::new(ctx))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Contexts(items) => Some(items),
            _ => None,
        }
    }

    /// The proxy carried by this value, whether held directly or as a context.
    pub fn as_interface(&self) -> Option<Interface> {
        match self {
            Value::Interface(i) => Some(i.clone()),
            Value::Context(ctx) => ctx.as_interface(),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<&Arc<dyn Context>> {
        match self {
            Value::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Whether both values hold the very same object.
    pub fn same_object(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Context(a), Value::Context(b)) => context_key(a) == context_key(b),
            (Value::Interface(a), Value::Interface(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Plain JSON rendering. Objects render as a small descriptor.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::String(s) => J::String(s.clone()),
            Value::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::List(items) | Value::Contexts(items) => {
                J::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => J::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Context(ctx) => serde_json::json!({ "$context": ctx.reflect().name }),
            Value::Interface(i) => serde_json::json!({
                "$interface": i.definition().name,
                "def_id": i.def_id(),
                "peer": i.peer_id(),
            }),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Contexts(a), Value::Contexts(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => self.same_object(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Value::Context(ctx) => write!(f, "Context({})", ctx.reflect().name),
            Value::Interface(i) => write!(f, "Interface({}#{})", i.definition().name, i.def_id()),
            Value::Contexts(items) => f.debug_tuple("Contexts").field(items).finish(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::String(s),
            J::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            J::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        match i64::try_from(i) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(i as f64),
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Arc<dyn Context>> for Value {
    fn from(ctx: Arc<dyn Context>) -> Self {
        Value::Context(ctx)
    }
}

impl From<Interface> for Value {
    fn from(i: Interface) -> Self {
        Value::Interface(i)
    }
}
