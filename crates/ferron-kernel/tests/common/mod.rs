//! Shared fixtures: sample contexts and helpers that join two nodes.

#![allow(dead_code)]

use async_trait::async_trait;
use ferron_kernel::{Context, Netron, Reflection, RemotePeer, Value};
use ferron_types::config::{NetronConfig, DEFAULT_PROTOCOL_ID};
use ferron_types::definition::{MethodMeta, PropertyMeta};
use ferron_types::error::{FerronError, FerronResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Item — a small context produced by calls
// ---------------------------------------------------------------------------

pub struct Item {
    pub name: String,
}

impl Item {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl Context for Item {
    fn reflect(&self) -> Reflection {
        Reflection::new("Item")
            .method("name", MethodMeta::new("string"))
            .property("title", PropertyMeta::new("string").readonly())
    }

    async fn call(&self, method: &str, _args: Vec<Value>) -> FerronResult<Value> {
        match method {
            "name" => Ok(Value::from(self.name.as_str())),
            other => Err(FerronError::NotExists(other.to_string())),
        }
    }

    async fn get(&self, property: &str) -> FerronResult<Option<Value>> {
        match property {
            "title" => Ok(Some(Value::from(format!("item {}", self.name)))),
            other => Err(FerronError::NotExists(other.to_string())),
        }
    }

    async fn set(&self, property: &str, _value: Value) -> FerronResult<()> {
        Err(FerronError::InvalidAccess(property.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Calculator — the main published context
// ---------------------------------------------------------------------------

pub struct Calculator {
    pub label: Mutex<String>,
    pub calls: AtomicUsize,
    /// The item handed out by `make_item`, kept so tests can check identity.
    pub held: Mutex<Option<Arc<dyn Context>>>,
    pub listeners: Mutex<Vec<Value>>,
}

impl Calculator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            label: Mutex::new("calc".to_string()),
            calls: AtomicUsize::new(0),
            held: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn held(&self) -> Option<Arc<dyn Context>> {
        self.held.lock().unwrap().clone()
    }
}

fn number(args: &[Value], index: usize) -> FerronResult<f64> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| FerronError::InvalidArgument(format!("argument {index} must be a number")))
}

#[async_trait]
impl Context for Calculator {
    fn reflect(&self) -> Reflection {
        Reflection::new("Calculator")
            .description("Adds numbers and hands out items")
            .method(
                "add",
                MethodMeta::new("number").arg("number", "a").arg("number", "b"),
            )
            .method(
                "divide",
                MethodMeta::new("number").arg("number", "a").arg("number", "b"),
            )
            .method("fail", MethodMeta::new("undefined"))
            .method("hang", MethodMeta::new("undefined"))
            .method("items", MethodMeta::new("Item[]"))
            .method("make_item", MethodMeta::new("Item").arg("string", "name"))
            .method("owns", MethodMeta::new("boolean").arg("Item", "item"))
            .method("subscribe", MethodMeta::new("undefined").arg("Listener", "listener"))
            .method("emit", MethodMeta::new("number").arg("string", "message"))
            .property("value", PropertyMeta::new("number").readonly())
            .property("label", PropertyMeta::new("string"))
            .property("note", PropertyMeta::new("string"))
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> FerronResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match method {
            "add" => Ok(Value::Float(number(&args, 0)? + number(&args, 1)?)),
            "divide" => Ok(Value::Float(number(&args, 0)? / number(&args, 1)?)),
            "fail" => Err(FerronError::Context("calculator exploded".into())),
            "hang" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }
            "items" => Ok(Value::Contexts(
                ["a", "b", "c"]
                    .iter()
                    .map(|n| Value::Context(Item::new(n)))
                    .collect(),
            )),
            "make_item" => {
                let mut held = self.held.lock().unwrap();
                let item: Arc<dyn Context> = match held.as_ref() {
                    Some(existing) => Arc::clone(existing),
                    None => {
                        let name = args.first().and_then(Value::as_str).unwrap_or("x");
                        Item::new(name)
                    }
                };
                *held = Some(Arc::clone(&item));
                Ok(Value::Context(item))
            }
            "owns" => {
                let held = self.held();
                let arg = args.first().and_then(Value::as_context);
                Ok(Value::Bool(match (held, arg) {
                    (Some(held), Some(arg)) => Value::Context(held).same_object(&Value::Context(Arc::clone(arg))),
                    _ => false,
                }))
            }
            "subscribe" => {
                let listener = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| FerronError::InvalidArgument("listener required".into()))?;
                self.listeners.lock().unwrap().push(listener);
                Ok(Value::Null)
            }
            "emit" => {
                let message = args.first().cloned().unwrap_or_default();
                let listeners: Vec<Value> = self.listeners.lock().unwrap().clone();
                let mut delivered = 0i64;
                for listener in listeners {
                    if let Some(proxy) = listener.as_interface() {
                        proxy.call("notify", vec![message.clone()]).await?;
                        delivered += 1;
                    }
                }
                Ok(Value::Int(delivered))
            }
            other => Err(FerronError::NotExists(other.to_string())),
        }
    }

    async fn get(&self, property: &str) -> FerronResult<Option<Value>> {
        match property {
            "value" => Ok(Some(Value::Int(42))),
            "label" => Ok(Some(Value::from(self.label.lock().unwrap().clone()))),
            "note" => Ok(None),
            other => Err(FerronError::NotExists(other.to_string())),
        }
    }

    async fn set(&self, property: &str, value: Value) -> FerronResult<()> {
        match property {
            "label" => {
                let label = value
                    .as_str()
                    .ok_or_else(|| FerronError::InvalidArgument("label must be a string".into()))?;
                *self.label.lock().unwrap() = label.to_string();
                Ok(())
            }
            other => Err(FerronError::InvalidAccess(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Listener — a client-side context the server calls back into
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Listener {
    pub received: Mutex<Vec<String>>,
}

#[async_trait]
impl Context for Listener {
    fn reflect(&self) -> Reflection {
        Reflection::new("Listener").method("notify", MethodMeta::new("undefined").arg("string", "message"))
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> FerronResult<Value> {
        match method {
            "notify" => {
                let message = args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.received.lock().unwrap().push(message);
                Ok(Value::Null)
            }
            other => Err(FerronError::NotExists(other.to_string())),
        }
    }

    async fn get(&self, property: &str) -> FerronResult<Option<Value>> {
        Err(FerronError::NotExists(property.to_string()))
    }

    async fn set(&self, property: &str, _value: Value) -> FerronResult<()> {
        Err(FerronError::NotExists(property.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Relay — forwards calls to a proxy it was handed
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Relay {
    pub target: Mutex<Option<Value>>,
}

#[async_trait]
impl Context for Relay {
    fn reflect(&self) -> Reflection {
        Reflection::new("Relay")
            .method("keep", MethodMeta::new("undefined").arg("Calculator", "target"))
            .method("add_via", MethodMeta::new("number").arg("number", "a").arg("number", "b"))
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> FerronResult<Value> {
        match method {
            "keep" => {
                *self.target.lock().unwrap() = args.into_iter().next();
                Ok(Value::Null)
            }
            "add_via" => {
                let target = self
                    .target
                    .lock()
                    .unwrap()
                    .as_ref()
                    .and_then(Value::as_interface)
                    .ok_or_else(|| FerronError::Context("no target kept".into()))?;
                target.call("add", args).await
            }
            other => Err(FerronError::NotExists(other.to_string())),
        }
    }

    async fn get(&self, property: &str) -> FerronResult<Option<Value>> {
        Err(FerronError::NotExists(property.to_string()))
    }

    async fn set(&self, property: &str, _value: Value) -> FerronResult<()> {
        Err(FerronError::NotExists(property.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub fn config(node_id: &str) -> NetronConfig {
    NetronConfig {
        node_id: node_id.to_string(),
        node_name: format!("{node_id}-node"),
        response_timeout_secs: 5,
        ..Default::default()
    }
}

pub fn node(node_id: &str) -> Arc<Netron> {
    Netron::new(config(node_id)).unwrap()
}

/// Join two nodes over an in-memory stream. Returns `(server's view of the
/// client, client's view of the server)`.
pub async fn join(server: &Arc<Netron>, client: &Arc<Netron>) -> (Arc<RemotePeer>, Arc<RemotePeer>) {
    let (server_io, client_io) = tokio::io::duplex(1 << 20);
    let protocols = vec![DEFAULT_PROTOCOL_ID.to_string()];
    let (accepted, opened) = tokio::join!(
        server.accept_stream(Box::new(server_io), None),
        client.open_stream(Box::new(client_io), None, &protocols),
    );
    (accepted.unwrap(), opened.unwrap())
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
