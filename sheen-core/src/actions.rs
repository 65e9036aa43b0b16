//! Built-in action handlers.
//!
//! Actions declared as `{"type": "<kind>", ...}` are dispatched by kind
//! through an [`ActionRegistry`]. New kinds are added by registering a
//! handler; the step engine never inspects the kind itself.

use crate::bindings::Bindings;
use crate::script::ActionOutcome;
use crate::value::display;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Evaluates one built-in action kind.
pub trait ActionHandler: Send + Sync {
    /// `payload` is the full action object.
    fn evaluate(&self, bindings: &Bindings, payload: &Value) -> ActionOutcome;
}

impl<F> ActionHandler for F
where
    F: Fn(&Bindings, &Value) -> ActionOutcome + Send + Sync,
{
    fn evaluate(&self, bindings: &Bindings, payload: &Value) -> ActionOutcome {
        self(bindings, payload)
    }
}

/// Logs the action's `text` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAction;

impl ActionHandler for LogAction {
    fn evaluate(&self, bindings: &Bindings, payload: &Value) -> ActionOutcome {
        let text = payload.get("text").map(display).unwrap_or_default();
        tracing::info!(target: "sheen::action", "{}", text);
        ActionOutcome::unchanged(bindings)
    }
}

/// Emits the action's `message` field.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmitAction;

impl ActionHandler for EmitAction {
    fn evaluate(&self, bindings: &Bindings, payload: &Value) -> ActionOutcome {
        match payload.get("message") {
            Some(message) => ActionOutcome::ok(bindings.clone(), vec![message.clone()]),
            None => ActionOutcome::failed(bindings, "emit action has no 'message'"),
        }
    }
}

/// Handlers keyed by action kind.
#[derive(Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Creates a registry holding the `log` and `emit` built-ins.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("log", LogAction);
        registry.register("emit", EmitAction);
        registry
    }

    /// Registers (or replaces) the handler for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
