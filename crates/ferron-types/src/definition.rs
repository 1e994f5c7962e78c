//! Definitions — the serializable schema of one context's public surface.
//!
//! A [`Definition`] is what travels to a remote process so it can build a
//! proxy. Type names are plain strings (`"number"`, `"string"`, ...) so both
//! ends agree on semantics without sharing code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parent id used by top-level (independently published) definitions.
pub const ROOT_PARENT_ID: u64 = 0;

/// One method argument: `[type, name]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgMeta(pub String, pub String);

impl ArgMeta {
    /// Argument type name.
    pub fn type_name(&self) -> &str {
        &self.0
    }

    /// Argument name (may be synthesised, see [`MethodMeta::normalized`]).
    pub fn name(&self) -> &str {
        &self.1
    }
}

/// Metadata of a remotely callable method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodMeta {
    /// Result type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Ordered argument descriptors.
    #[serde(default)]
    pub args: Vec<ArgMeta>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl MethodMeta {
    /// A method returning `type_name` with no arguments.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            args: Vec::new(),
            description: String::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        self.args.push(ArgMeta(type_name.into(), name.into()));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Fill in missing argument names as `<3 letters of type>Arg<index>`.
    pub fn normalized(mut self) -> Self {
        for (index, arg) in self.args.iter_mut().enumerate() {
            if arg.1.is_empty() {
                let prefix: String = arg.0.to_lowercase().chars().take(3).collect();
                arg.1 = format!("{prefix}Arg{index}");
            }
        }
        self
    }
}

/// Metadata of a remotely accessible property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMeta {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl PropertyMeta {
    /// A writable property of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            readonly: false,
            description: String::new(),
        }
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A member of a context: either a method or a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "member", rename_all = "snake_case")]
pub enum MemberMeta {
    Method(MethodMeta),
    Property(PropertyMeta),
}

impl MemberMeta {
    pub fn is_method(&self) -> bool {
        matches!(self, MemberMeta::Method(_))
    }

    /// True only for read-only properties. Methods are never "readonly".
    pub fn is_readonly(&self) -> bool {
        matches!(self, MemberMeta::Property(p) if p.readonly)
    }

    pub fn type_name(&self) -> &str {
        match self {
            MemberMeta::Method(m) => &m.type_name,
            MemberMeta::Property(p) => &p.type_name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            MemberMeta::Method(m) => &m.description,
            MemberMeta::Property(p) => &p.description,
        }
    }
}

/// Serializable schema of one exposed context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Unique within the issuing process's lifetime.
    pub id: u64,
    /// [`ROOT_PARENT_ID`] for published contexts, otherwise the id of the
    /// definition whose call produced this one.
    #[serde(default)]
    pub parent_id: u64,
    /// Peer this definition was disclosed to, if it was produced by marshaling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Static type name of a client-side override, if the context declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twin: Option<String>,
    pub members: BTreeMap<String, MemberMeta>,
}

impl Definition {
    /// Whether this definition was published directly rather than produced by a call.
    pub fn is_top_level(&self) -> bool {
        self.parent_id == ROOT_PARENT_ID
    }

    pub fn member(&self, name: &str) -> Option<&MemberMeta> {
        self.members.get(name)
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    /// Iterate methods in name order.
    pub fn methods(&self) -> impl Iterator<Item = (&str, &MethodMeta)> {
        self.members.iter().filter_map(|(name, meta)| match meta {
            MemberMeta::Method(m) => Some((name.as_str(), m)),
            MemberMeta::Property(_) => None,
        })
    }

    /// Iterate properties in name order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyMeta)> {
        self.members.iter().filter_map(|(name, meta)| match meta {
            MemberMeta::Property(p) => Some((name.as_str(), p)),
            MemberMeta::Method(_) => None,
        })
    }

    /// `<type> name(<argType> argName, ...)`, or `None` if `name` is not a method.
    pub fn method_signature(&self, name: &str) -> Option<String> {
        match self.members.get(name)? {
            MemberMeta::Method(m) => {
                let args: Vec<String> = m
                    .args
                    .iter()
                    .map(|a| format!("<{}> {}", a.type_name(), a.name()))
                    .collect();
                Some(format!("<{}> {}({})", m.type_name, name, args.join(", ")))
            }
            MemberMeta::Property(_) => None,
        }
    }

    /// `<type> name`, prefixed with `<readonly>` for read-only properties.
    pub fn property_signature(&self, name: &str) -> Option<String> {
        match self.members.get(name)? {
            MemberMeta::Property(p) if p.readonly => {
                Some(format!("<readonly> <{}> {}", p.type_name, name))
            }
            MemberMeta::Property(p) => Some(format!("<{}> {}", p.type_name, name)),
            MemberMeta::Method(_) => None,
        }
    }

    /// Pointer-only form of this definition.
    pub fn to_reference(&self) -> Reference {
        Reference { def_id: self.id }
    }
}

/// Pointer to a definition the receiving side already owns. Never carries schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub def_id: u64,
}

impl Reference {
    pub fn new(def_id: u64) -> Self {
        Self { def_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> Definition {
        let mut members = BTreeMap::new();
        members.insert(
            "add".to_string(),
            MemberMeta::Method(
                MethodMeta::new("number")
                    .arg("number", "a")
                    .arg("number", "b")
                    .description("Adds two numbers"),
            ),
        );
        members.insert(
            "value".to_string(),
            MemberMeta::Property(PropertyMeta::new("number").readonly()),
        );
        members.insert(
            "label".to_string(),
            MemberMeta::Property(PropertyMeta::new("string")),
        );
        Definition {
            id: 7,
            parent_id: ROOT_PARENT_ID,
            peer_id: None,
            name: "Calculator".to_string(),
            description: String::new(),
            twin: None,
            members,
        }
    }

    #[test]
    fn test_method_signature() {
        let def = calculator();
        assert_eq!(
            def.method_signature("add").unwrap(),
            "<number> add(<number> a, <number> b)"
        );
        assert!(def.method_signature("value").is_none());
        assert!(def.method_signature("missing").is_none());
    }

    #[test]
    fn test_property_signature() {
        let def = calculator();
        assert_eq!(
            def.property_signature("value").unwrap(),
            "<readonly> <number> value"
        );
        assert_eq!(def.property_signature("label").unwrap(), "<string> label");
    }

    #[test]
    fn test_synthesised_arg_names() {
        let meta = MethodMeta::new("undefined")
            .arg("String", "")
            .arg("number", "count")
            .arg("Object", "")
            .normalized();
        assert_eq!(meta.args[0].name(), "strArg0");
        assert_eq!(meta.args[1].name(), "count");
        assert_eq!(meta.args[2].name(), "objArg2");
    }

    #[test]
    fn test_member_queries() {
        let def = calculator();
        assert!(def.member("add").unwrap().is_method());
        assert!(def.member("value").unwrap().is_readonly());
        assert!(!def.member("label").unwrap().is_readonly());
        assert_eq!(def.methods().count(), 1);
        assert_eq!(def.properties().count(), 2);
        assert!(def.is_top_level());
        assert_eq!(def.to_reference(), Reference::new(7));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(calculator()).unwrap();
        let add = &json["members"]["add"];
        assert_eq!(add["member"], "method");
        assert_eq!(add["type"], "number");
        assert_eq!(add["args"][0][0], "number");
        assert_eq!(add["args"][0][1], "a");
        assert_eq!(json["members"]["value"]["readonly"], true);
        assert!(json.get("peer_id").is_none());
    }
}
