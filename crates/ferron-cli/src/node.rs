//! The `node` context every `ferron serve` process publishes.

use async_trait::async_trait;
use ferron_kernel::{Context, Netron, Reflection, Value};
use ferron_types::definition::{MethodMeta, PropertyMeta};
use ferron_types::error::{FerronError, FerronResult};
use std::sync::{Arc, Weak};

/// Name the built-in context is attached under.
pub const NODE_CONTEXT: &str = "node";

/// Reports on the hosting node. Holds the node weakly: the node owns the
/// stub that owns this context.
pub struct NodeContext {
    netron: Weak<Netron>,
}

impl NodeContext {
    pub fn new(netron: &Arc<Netron>) -> Arc<Self> {
        Arc::new(Self {
            netron: Arc::downgrade(netron),
        })
    }

    fn netron(&self) -> FerronResult<Arc<Netron>> {
        self.netron
            .upgrade()
            .ok_or_else(|| FerronError::Context("node is shutting down".into()))
    }
}

#[async_trait]
impl Context for NodeContext {
    fn reflect(&self) -> Reflection {
        Reflection::new("Node")
            .description("Information about the serving node")
            .method("ping", MethodMeta::new("string").description("Liveness check"))
            .method(
                "echo",
                MethodMeta::new("any")
                    .arg("any", "value")
                    .description("Returns its argument"),
            )
            .property("name", PropertyMeta::new("string").readonly())
            .property(
                "uptime",
                PropertyMeta::new("number")
                    .readonly()
                    .description("Seconds since the node was created"),
            )
            .property(
                "peers",
                PropertyMeta::new("string[]")
                    .readonly()
                    .description("Ids of connected peers"),
            )
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> FerronResult<Value> {
        match method {
            "ping" => Ok(Value::from("pong")),
            "echo" => Ok(args.into_iter().next().unwrap_or_default()),
            other => Err(FerronError::NotExists(other.to_string())),
        }
    }

    async fn get(&self, property: &str) -> FerronResult<Option<Value>> {
        let netron = self.netron()?;
        let value = match property {
            "name" => Value::from(netron.config().node_name.as_str()),
            "uptime" => Value::from(netron.uptime_secs()),
            "peers" => {
                let mut ids: Vec<String> =
                    netron.peers().iter().map(|p| p.id().to_string()).collect();
                ids.sort();
                Value::List(ids.into_iter().map(Value::from).collect())
            }
            other => return Err(FerronError::NotExists(other.to_string())),
        };
        Ok(Some(value))
    }

    async fn set(&self, property: &str, _value: Value) -> FerronResult<()> {
        Err(FerronError::InvalidAccess(property.to_string()))
    }
}
