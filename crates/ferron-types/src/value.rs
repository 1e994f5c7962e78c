//! Values as they travel on the wire.
//!
//! Plain data passes through unchanged. Objects are never sent by value: a
//! context becomes a [`Definition`], an ordered group of contexts becomes a
//! `Definitions` sequence, and a proxy headed back to its owner becomes a
//! [`Reference`].

use crate::definition::{Definition, Reference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A marshaled value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum WireValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    /// Schema of a context newly disclosed to the receiver.
    Definition(Box<Definition>),
    /// Ordered sequence of disclosed contexts; each element is a
    /// `Definition` or a `Reference`.
    Definitions(Vec<WireValue>),
    /// Pointer back to a definition the receiver owns.
    Reference(Reference),
}

impl WireValue {
    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    /// Plain JSON rendering. Definitions render as their schema, references as
    /// `{"$ref": id}`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            WireValue::Null => J::Null,
            WireValue::Bool(b) => J::Bool(*b),
            WireValue::Int(i) => J::from(*i),
            WireValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            WireValue::String(s) => J::String(s.clone()),
            WireValue::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            WireValue::List(items) | WireValue::Definitions(items) => {
                J::Array(items.iter().map(WireValue::to_json).collect())
            }
            WireValue::Map(entries) => J::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            WireValue::Definition(def) => serde_json::to_value(def.as_ref()).unwrap_or(J::Null),
            WireValue::Reference(r) => serde_json::json!({ "$ref": r.def_id }),
        }
    }
}

impl From<serde_json::Value> for WireValue {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => WireValue::Null,
            J::Bool(b) => WireValue::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => WireValue::Int(i),
                None => WireValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => WireValue::String(s),
            J::Array(items) => WireValue::List(items.into_iter().map(WireValue::from).collect()),
            J::Object(entries) => WireValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, WireValue::from(v)))
                    .collect(),
            ),
        }
    }
}
