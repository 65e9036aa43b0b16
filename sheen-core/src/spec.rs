//! Spec types.
//!
//! A spec is a graph of named nodes expressed as JSON:
//!
//! ```json
//! {
//!   "name": "door",
//!   "nodes": {
//!     "start": {
//!       "branching": {
//!         "type": "message",
//!         "branches": [
//!           {"pattern": {"event": "open", "by": "?who"}, "target": "opened"}
//!         ]
//!       }
//!     },
//!     "opened": {
//!       "actions": [{"interpreter": "ecmascript", "source": "bindings.opens = (bindings.opens || 0) + 1;"}],
//!       "timers": [{"id": "close", "delay": "autoclose_ms"}],
//!       "branching": {"branches": [{"target": "start"}]}
//!     }
//!   }
//! }
//! ```

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Interpreter names accepted for embedded script source.
pub const INTERPRETER_ALIASES: &[&str] = &["ecmascript", "ecmascript-5.1", "goja", "sheen"];

/// Returns true if `name` is an accepted interpreter alias.
pub fn is_supported_interpreter(name: &str) -> bool {
    INTERPRETER_ALIASES.contains(&name)
}

/// An action attached to a node or used as a branch guard.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Embedded script source run through the script evaluator.
    Script { interpreter: String, source: String },
    /// A built-in action dispatched by kind through the action registry.
    /// `payload` is the whole action object, `type` included.
    Builtin { kind: String, payload: Value },
}

impl Action {
    pub fn script(source: impl Into<String>) -> Self {
        Action::Script {
            interpreter: INTERPRETER_ALIASES[0].to_string(),
            source: source.into(),
        }
    }
}

impl TryFrom<Value> for Action {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(map) = value else {
            return Err("action must be an object".to_string());
        };

        if let Some(interpreter) = map.get("interpreter") {
            let interpreter = interpreter
                .as_str()
                .ok_or("action interpreter must be a string")?
                .to_string();
            let source = match map.get("source") {
                Some(Value::String(s)) => s.clone(),
                None | Some(Value::Null) => String::new(),
                Some(_) => return Err("action source must be a string".to_string()),
            };
            return Ok(Action::Script {
                interpreter,
                source,
            });
        }

        match map.get("type") {
            Some(Value::String(kind)) => Ok(Action::Builtin {
                kind: kind.clone(),
                payload: Value::Object(map),
            }),
            _ => Err("action needs an 'interpreter' or a 'type'".to_string()),
        }
    }
}

impl From<Action> for Value {
    fn from(action: Action) -> Self {
        match action {
            Action::Script {
                interpreter,
                source,
            } => {
                let mut map = Map::new();
                map.insert("interpreter".to_string(), Value::String(interpreter));
                map.insert("source".to_string(), Value::String(source));
                Value::Object(map)
            }
            Action::Builtin { payload, .. } => payload,
        }
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Value::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Action::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// A timer armed when its node is stepped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    /// Event name delivered back to the machine when the timer fires.
    pub id: String,

    /// Expression evaluated against bindings to a delay in milliseconds.
    #[serde(deserialize_with = "deserialize_delay_source")]
    pub delay: String,
}

/// Accepts either expression source or a bare number.
fn deserialize_delay_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct DelayVisitor;

    impl<'de> Visitor<'de> for DelayVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a delay expression or a number of milliseconds")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(DelayVisitor)
}

/// Which subject the branches of a node are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchingKind {
    /// Branches match the pending message, which they consume.
    Message,
    /// Branches match the current bindings; no message is needed.
    #[default]
    Spontaneous,
}

impl From<String> for BranchingKind {
    fn from(s: String) -> Self {
        if s == "message" {
            BranchingKind::Message
        } else {
            BranchingKind::Spontaneous
        }
    }
}

impl From<BranchingKind> for String {
    fn from(kind: BranchingKind) -> Self {
        match kind {
            BranchingKind::Message => "message".to_string(),
            BranchingKind::Spontaneous => "bindings".to_string(),
        }
    }
}

impl Serialize for BranchingKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from(*self))
    }
}

impl<'de> Deserialize<'de> for BranchingKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(BranchingKind::from)
    }
}

/// Branching rules for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branching {
    #[serde(rename = "type", alias = "mode", default)]
    pub kind: BranchingKind,

    #[serde(default)]
    pub branches: Vec<Branch>,
}

/// Where a successful branch leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// A plain node name.
    Node(String),
    /// A destination node plus a timer to arm on the way.
    WithTimer {
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timer: Option<Timer>,
    },
}

impl Target {
    /// Returns the destination node name.
    pub fn dest(&self) -> &str {
        match self {
            Target::Node(name) => name,
            Target::WithTimer { dest, .. } => dest,
        }
    }

    /// Returns the extra timer, if any.
    pub fn timer(&self) -> Option<&Timer> {
        match self {
            Target::Node(_) => None,
            Target::WithTimer { timer, .. } => timer.as_ref(),
        }
    }
}

/// One transition condition plus its target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,

    pub target: Target,
}

/// A node as written, singular shorthands included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timers: Option<Vec<Timer>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<Timer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branching: Option<Branching>,
}

/// A named state with its actions, timers and branching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub actions: Vec<Action>,
    pub timers: Vec<Timer>,
    pub branching: Option<Branching>,
}

impl From<NodeRaw> for Node {
    fn from(raw: NodeRaw) -> Self {
        Self {
            actions: raw.actions.unwrap_or_else(|| raw.action.into_iter().collect()),
            timers: raw.timers.unwrap_or_else(|| raw.timer.into_iter().collect()),
            branching: raw.branching,
        }
    }
}

/// Raw spec as stored/transmitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    /// `"json"` means branch patterns are written as JSON text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patternsyntax: Option<String>,

    /// Older spelling of `patternsyntax: "json"`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parsepatterns: bool,

    pub nodes: BTreeMap<String, NodeRaw>,
}

/// Validated spec.
#[derive(Debug, Clone)]
pub struct Spec {
    /// Spec name (from the document, or the name it was loaded under).
    pub name: String,

    nodes: HashMap<String, Node>,

    /// Raw form, kept for serialization.
    pub raw: SpecRaw,

    /// Hash of the spec for identity checks.
    pub checksum: String,
}

impl Spec {
    /// Parses and validates a spec from JSON.
    pub fn from_json(name: impl Into<String>, json: &Value) -> Result<Self, CoreError> {
        let raw: SpecRaw = serde_json::from_value(json.clone()).map_err(|e| {
            CoreError::InvalidSpec {
                reason: e.to_string(),
            }
        })?;
        Self::from_raw(name, raw)
    }

    /// Creates a spec from raw parts, checking every branch target.
    pub fn from_raw(name: impl Into<String>, raw: SpecRaw) -> Result<Self, CoreError> {
        let name = raw.name.clone().unwrap_or_else(|| name.into());
        let json_patterns = raw.parsepatterns || raw.patternsyntax.as_deref() == Some("json");

        let mut nodes: HashMap<String, Node> = raw
            .nodes
            .iter()
            .map(|(node_name, node)| (node_name.clone(), Node::from(node.clone())))
            .collect();

        for (node_name, node) in nodes.iter_mut() {
            let Some(branching) = node.branching.as_mut() else {
                continue;
            };
            for branch in branching.branches.iter_mut() {
                if json_patterns {
                    if let Some(Value::String(text)) = &branch.pattern {
                        let parsed = serde_json::from_str(text).map_err(|e| {
                            CoreError::InvalidSpec {
                                reason: format!("bad pattern in node '{}': {}", node_name, e),
                            }
                        })?;
                        branch.pattern = Some(parsed);
                    }
                }

                let dest = branch.target.dest();
                if !raw.nodes.contains_key(dest) {
                    return Err(CoreError::InvalidTarget {
                        reason: format!(
                            "branch in node '{}' targets unknown node '{}'",
                            node_name, dest
                        ),
                    });
                }
            }
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            name,
            nodes,
            raw,
            checksum,
        })
    }

    /// Looks up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Returns true if the node exists.
    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Returns all node names, sorted.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the raw spec as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}
