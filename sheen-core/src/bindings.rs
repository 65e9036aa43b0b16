//! Binding sets threaded through a machine.
//!
//! Bindings are a flat map from string keys to JSON values. Keys that start
//! with [`VARIABLE_SIGIL`] are pattern variables: the matcher produces them
//! and constrains later matches with them. The [`ERROR_KEY`] entry carries the
//! last script evaluation error so a spec can branch on it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix that marks a pattern variable.
pub const VARIABLE_SIGIL: char = '?';

/// Key holding the last evaluation error.
pub const ERROR_KEY: &str = "error";

/// Returns true if the string names a pattern variable.
pub fn is_variable(s: &str) -> bool {
    s.starts_with(VARIABLE_SIGIL)
}

/// Returns true for the bare sigil, which matches anything and binds nothing.
pub fn is_anonymous(s: &str) -> bool {
    s.len() == VARIABLE_SIGIL.len_utf8() && is_variable(s)
}

/// A set of bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bindings(Map<String, Value>);

impl Bindings {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds bindings from a JSON object. Returns `None` for any other value.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the pattern variables bound in this set.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter().filter(|(k, _)| is_variable(k))
    }

    /// Returns the last recorded evaluation error, if any.
    pub fn error(&self) -> Option<&Value> {
        self.0.get(ERROR_KEY)
    }

    /// Returns these bindings with the error key set.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.0.insert(ERROR_KEY.to_string(), Value::String(error.into()));
        self
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Returns the bindings as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Bindings {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
