//! State machine engine - ties the script evaluator and the action registry
//! to step and walk.

use crate::actions::{ActionHandler, ActionRegistry};
use crate::bindings::Bindings;
use crate::error::CoreError;
use crate::matcher::{matches, PatternMatcher};
use crate::script::{ActionOutcome, SandboxEvaluator, ScriptEvaluator};
use crate::spec::{is_supported_interpreter, Action};
use crate::timings::Timings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default bound on steps per walk.
pub const DEFAULT_MAX_STEPS: usize = 32;

/// Engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum steps a single walk may take.
    pub max_steps: usize,
    /// Log every step of every walk.
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            debug: false,
        }
    }
}

/// The state machine engine.
///
/// Stateless with respect to machines: callers pass the spec and state in
/// and receive the new state back.
pub struct Engine {
    /// Evaluator for embedded script actions, guards and tests.
    evaluator: Arc<dyn ScriptEvaluator>,

    /// Matcher for branch patterns.
    matcher: Arc<dyn PatternMatcher>,

    /// Built-in action handlers.
    actions: ActionRegistry,

    config: EngineConfig,

    timings: Arc<Timings>,
}

impl Engine {
    /// Creates an engine with the bundled sandbox evaluator.
    pub fn new(config: EngineConfig) -> Self {
        let timings = Arc::new(Timings::new());
        let evaluator = SandboxEvaluator::new().with_timings(timings.clone());
        Self {
            evaluator: Arc::new(evaluator),
            matcher: Arc::new(matches),
            actions: ActionRegistry::new(),
            config,
            timings,
        }
    }

    /// Replaces the script evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Replaces the pattern matcher.
    pub fn with_matcher(mut self, matcher: Arc<dyn PatternMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Replaces the action registry.
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    /// Registers a built-in action handler.
    pub fn register_action(&mut self, kind: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.actions.register(kind, handler);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Arc<dyn ScriptEvaluator> {
        &self.evaluator
    }

    pub fn matcher(&self) -> &Arc<dyn PatternMatcher> {
        &self.matcher
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn timings(&self) -> &Arc<Timings> {
        &self.timings
    }

    // =========================================================================
    // Action dispatch
    // =========================================================================

    /// Runs a node action or guard against `bindings`.
    ///
    /// An unknown interpreter is a structural error. An unknown built-in kind
    /// is logged and leaves the bindings unchanged.
    pub(crate) fn run_action(
        &self,
        action: &Action,
        bindings: &Bindings,
    ) -> Result<ActionOutcome, CoreError> {
        match action {
            Action::Script {
                interpreter,
                source,
            } => {
                if !is_supported_interpreter(interpreter) {
                    return Err(CoreError::BadInterpreter {
                        interpreter: interpreter.clone(),
                    });
                }
                Ok(self.evaluator.evaluate_action(bindings, source))
            }
            Action::Builtin { kind, payload } => match self.actions.get(kind) {
                Some(handler) => Ok(handler.evaluate(bindings, payload)),
                None => {
                    tracing::warn!(kind = %kind, "unknown action type, skipping");
                    Ok(ActionOutcome::unchanged(bindings))
                }
            },
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_config_defaults() {
        let config: EngineConfig = serde_json::from_value(json!({"debug": true})).unwrap();
        assert_eq!(config.max_steps, 32);
        assert!(config.debug);
    }

    #[test]
    fn test_bad_interpreter() {
        let engine = Engine::default();
        let action = Action::Script {
            interpreter: "python".to_string(),
            source: "x = 1".to_string(),
        };
        let err = engine.run_action(&action, &Bindings::new()).unwrap_err();
        assert!(matches!(err, CoreError::BadInterpreter { ref interpreter } if interpreter == "python"));
    }

    #[test]
    fn test_alias_accepted() {
        let engine = Engine::default();
        for alias in ["ecmascript", "ecmascript-5.1", "goja", "sheen"] {
            let action = Action::Script {
                interpreter: alias.to_string(),
                source: "bindings.ok = true;".to_string(),
            };
            let out = engine.run_action(&action, &Bindings::new()).unwrap();
            assert_eq!(out.bindings.unwrap().get("ok"), Some(&json!(true)));
        }
    }

    #[test]
    fn test_unknown_builtin_skipped() {
        let engine = Engine::default();
        let bs = Bindings::from_value(json!({"a": 1})).unwrap();
        let action = Action::Builtin {
            kind: "RBUS".to_string(),
            payload: json!({"type": "RBUS"}),
        };
        let out = engine.run_action(&action, &bs).unwrap();
        assert_eq!(out, ActionOutcome::unchanged(&bs));
    }

    #[test]
    fn test_registered_builtin() {
        let mut engine = Engine::default();
        engine.register_action("stamp", |bs: &Bindings, payload: &Value| {
            let mut next = bs.clone();
            next.insert("stamp", payload["value"].clone());
            ActionOutcome::ok(next, Vec::new())
        });
        let action = Action::Builtin {
            kind: "stamp".to_string(),
            payload: json!({"type": "stamp", "value": 9}),
        };
        let out = engine.run_action(&action, &Bindings::new()).unwrap();
        assert_eq!(out.bindings.unwrap().get("stamp"), Some(&json!(9)));
    }
}
