//! Crew model: a set of machines sharing one message stream.
//!
//! Persisted form:
//!
//! ```json
//! {"id": "house", "machines": {
//!     "door": {"spec": "door.json", "node": "start", "bindings": {}}
//! }}
//! ```

use crate::error::CrewError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sheen_core::{Bindings, MachineState, Walked, START_NODE};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Message field naming the target machine(s).
pub const ROUTING_FIELD: &str = "to";

fn default_node() -> String {
    START_NODE.to_string()
}

/// One machine: a spec reference plus its committed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// Spec reference, resolved through a spec source.
    pub spec: String,

    #[serde(default = "default_node")]
    pub node: String,

    #[serde(default, alias = "bs")]
    pub bindings: Bindings,
}

impl Machine {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            node: default_node(),
            bindings: Bindings::new(),
        }
    }

    pub fn with_state(mut self, node: impl Into<String>, bindings: Bindings) -> Self {
        self.node = node.into();
        self.bindings = bindings;
        self
    }

    /// Returns the committed state.
    pub fn state(&self) -> MachineState {
        MachineState::new(self.node.clone(), self.bindings.clone())
    }

    /// Replaces node and bindings with the walk's final state.
    pub fn commit(&mut self, walked: Walked) {
        self.node = walked.to.node;
        self.bindings = walked.to.bindings;
    }
}

/// A crew of machines keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crew {
    pub id: String,

    #[serde(default)]
    pub machines: BTreeMap<String, Machine>,
}

impl Crew {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            machines: BTreeMap::new(),
        }
    }

    /// Adds a machine, replacing any machine with the same id.
    pub fn add_machine(&mut self, id: impl Into<String>, machine: Machine) -> Option<Machine> {
        self.machines.insert(id.into(), machine)
    }

    pub fn remove_machine(&mut self, id: &str) -> Option<Machine> {
        self.machines.remove(id)
    }

    pub fn machine(&self, id: &str) -> Option<&Machine> {
        self.machines.get(id)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self, CrewError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, CrewError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Loads a persisted crew from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CrewError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Machine ids a message is delivered to, in processing order.
    ///
    /// Explicit targets keep their given order, minus duplicates and ids
    /// not in the crew. Broadcast follows id order.
    pub fn targets(&self, message: &Value) -> Vec<String> {
        match Routing::of(message) {
            Routing::Broadcast => self.machines.keys().cloned().collect(),
            Routing::Targets(ids) => {
                let mut seen = BTreeSet::new();
                ids.into_iter()
                    .filter(|id| self.machines.contains_key(id))
                    .filter(|id| seen.insert(id.clone()))
                    .collect()
            }
        }
    }
}

/// How a message is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    /// No routing field: every machine.
    Broadcast,
    /// Exactly these ids.
    Targets(Vec<String>),
}

impl Routing {
    /// Reads the routing field of a message.
    pub fn of(message: &Value) -> Self {
        match message.get(ROUTING_FIELD) {
            None | Some(Value::Null) => Routing::Broadcast,
            Some(Value::String(id)) => Routing::Targets(vec![id.clone()]),
            Some(Value::Array(ids)) => Routing::Targets(
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect(),
            ),
            Some(other) => {
                tracing::warn!(to = %other, "unroutable message target");
                Routing::Targets(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crew() -> Crew {
        let mut crew = Crew::new("house");
        for id in ["c", "a", "b"] {
            crew.add_machine(id, Machine::new("spec.json"));
        }
        crew
    }

    #[test]
    fn test_broadcast_in_id_order() {
        assert_eq!(crew().targets(&json!({"event": "tick"})), vec!["a", "b", "c"]);
        assert_eq!(crew().targets(&json!({"to": null})), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_single_target() {
        assert_eq!(crew().targets(&json!({"to": "b"})), vec!["b"]);
        assert!(crew().targets(&json!({"to": "zz"})).is_empty());
    }

    #[test]
    fn test_target_list() {
        let targets = crew().targets(&json!({"to": ["c", "missing", "a", "c", 7]}));
        assert_eq!(targets, vec!["c", "a"]);
    }

    #[test]
    fn test_unroutable_target() {
        assert!(crew().targets(&json!({"to": 5})).is_empty());
        assert_eq!(Routing::of(&json!("not an object")), Routing::Broadcast);
    }

    #[test]
    fn test_persisted_form() {
        let json = r#"{"id":"simpsons","machines":{"homer":{"spec":"doh.json","node":"couch","bs":{"beer":1}},"bart":{"spec":"skate.json"}}}"#;
        let crew = Crew::from_json(json).unwrap();

        let homer = crew.machine("homer").unwrap();
        assert_eq!(homer.node, "couch");
        assert_eq!(homer.bindings.get("beer"), Some(&json!(1)));
        assert_eq!(crew.machine("bart").unwrap().node, "start");

        let again = Crew::from_json(&crew.to_json().unwrap()).unwrap();
        assert_eq!(again, crew);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crew.json");
        std::fs::write(&path, r#"{"id":"x","machines":{}}"#).unwrap();
        let crew = Crew::from_file(&path).unwrap();
        assert_eq!(crew.id, "x");
        assert!(crew.is_empty());

        assert!(Crew::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_add_and_remove() {
        let mut crew = crew();
        assert!(crew.add_machine("a", Machine::new("other.json")).is_some());
        assert_eq!(crew.len(), 3);
        assert!(crew.remove_machine("a").is_some());
        assert!(crew.remove_machine("a").is_none());
        assert_eq!(crew.len(), 2);
    }
}
