//! Walk driver: steps a machine until it rests.

use crate::engine::Engine;
use crate::error::CoreError;
use crate::spec::Spec;
use crate::step::{ArmedTimer, MachineState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node a machine starts in when it has no state yet.
pub const START_NODE: &str = "start";

/// Why a walk stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// The step bound was reached.
    Limited,
}

/// Result of walking a machine for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Walked {
    /// Final state. Equal to the starting state when no step transitioned.
    pub to: MachineState,
    /// True when some step consumed the message.
    pub consumed: bool,
    /// Emissions of every step, in execution order.
    pub emitted: Vec<Value>,
    /// Timers armed along the way, in arming order.
    pub timers: Vec<ArmedTimer>,
    /// Number of transitions taken.
    pub steps: usize,
    pub stopped_because: Option<StopReason>,
}

impl Walked {
    /// True when at least one step transitioned.
    pub fn transitioned(&self) -> bool {
        self.steps > 0
    }

    pub fn is_limited(&self) -> bool {
        self.stopped_because == Some(StopReason::Limited)
    }
}

impl Engine {
    /// Steps from `state` (default: [`START_NODE`] with empty bindings)
    /// until no branch fires or the step bound is reached.
    ///
    /// The message is offered to every step until one consumes it.
    pub fn walk(
        &self,
        spec: &Spec,
        state: Option<MachineState>,
        message: Option<&Value>,
    ) -> Result<Walked, CoreError> {
        let _timing = self.timings().start("walk");
        let max_steps = self.config().max_steps;
        let debug = self.config().debug;

        let mut current = state.unwrap_or_default();
        let mut pending = message;
        let mut consumed = false;
        let mut emitted = Vec::new();
        let mut timers = Vec::new();
        let mut steps = 0;
        let mut stopped_because = None;

        loop {
            if steps == max_steps {
                tracing::warn!(spec = %spec.name, node = %current.node, max_steps, "walk hit step limit");
                stopped_because = Some(StopReason::Limited);
                break;
            }

            let Some(stepped) = self.step(spec, &current, pending, &mut timers)? else {
                if debug {
                    tracing::debug!(step = steps, node = %current.node, "resting");
                }
                break;
            };

            if debug {
                tracing::debug!(
                    step = steps,
                    from = %current.node,
                    to = %stepped.to.node,
                    consumed = stepped.consumed,
                    message = ?pending,
                    "stepped"
                );
            }

            steps += 1;
            if stepped.consumed {
                pending = None;
                consumed = true;
            }
            emitted.extend(stepped.emitted);
            current = stepped.to;
        }

        Ok(Walked {
            to: current,
            consumed,
            emitted,
            timers,
            steps,
            stopped_because,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::Bindings;
    use crate::engine::EngineConfig;
    use serde_json::json;

    fn spec(json: Value) -> Spec {
        Spec::from_json("walk", &json).unwrap()
    }

    #[test]
    fn test_default_state_is_start() {
        let spec = spec(json!({"nodes": {
            "start": {"branching": {"type": "message", "branches": [
                {"pattern": {"event": "start"}, "target": "running"}
            ]}},
            "running": {}
        }}));
        let walked = Engine::default()
            .walk(&spec, None, Some(&json!({"event": "start"})))
            .unwrap();
        assert_eq!(walked.to.node, "running");
        assert!(walked.consumed);
        assert_eq!(walked.steps, 1);
        assert!(walked.stopped_because.is_none());
    }

    #[test]
    fn test_message_consumed_once() {
        // Both nodes wait for the same message; only the first may take it.
        let spec = spec(json!({"nodes": {
            "start": {"branching": {"type": "message", "branches": [
                {"pattern": {"go": true}, "target": "middle"}
            ]}},
            "middle": {"branching": {"type": "message", "branches": [
                {"pattern": {"go": true}, "target": "end"}
            ]}},
            "end": {}
        }}));
        let walked = Engine::default()
            .walk(&spec, None, Some(&json!({"go": true})))
            .unwrap();
        assert_eq!(walked.to.node, "middle");
        assert_eq!(walked.steps, 1);
    }

    #[test]
    fn test_spontaneous_chain_and_emissions() {
        let spec = spec(json!({"nodes": {
            "start": {"branching": {"type": "message", "branches": [
                {"pattern": {"n": "?n"}, "target": "one"}
            ]}},
            "one": {
                "action": {"interpreter": "goja", "source": "_.out('one');"},
                "branching": {"branches": [{"target": "two"}]}
            },
            "two": {
                "action": {"interpreter": "goja", "source": "_.out('two');"},
                "branching": {"branches": [{"target": "done"}]}
            },
            "done": {}
        }}));
        let walked = Engine::default()
            .walk(&spec, None, Some(&json!({"n": 1})))
            .unwrap();
        assert_eq!(walked.to.node, "done");
        assert_eq!(walked.steps, 3);
        assert!(walked.consumed);
        assert_eq!(walked.emitted, vec![json!("one"), json!("two")]);
        assert_eq!(walked.to.bindings.get("?n"), Some(&json!(1)));
    }

    #[test]
    fn test_cycle_is_limited() {
        let spec = spec(json!({"nodes": {
            "start": {
                "action": {"interpreter": "goja", "source": "bindings.n = (bindings.n || 0) + 1;"},
                "branching": {"branches": [{"target": "start"}]}
            }
        }}));
        let engine = Engine::new(EngineConfig {
            max_steps: 5,
            debug: true,
        });
        let walked = engine.walk(&spec, None, None).unwrap();
        assert_eq!(walked.steps, 5);
        assert!(walked.is_limited());
        assert_eq!(walked.to.bindings.get("n"), Some(&json!(5)));
    }

    #[test]
    fn test_no_transition_keeps_state() {
        let spec = spec(json!({"nodes": {
            "start": {
                "action": {"interpreter": "goja", "source": "bindings.touched = true; _.out('x');"},
                "branching": {"type": "message", "branches": [
                    {"pattern": {"event": "open"}, "target": "start"}
                ]}
            }
        }}));
        let state = MachineState::new("start", Bindings::from_value(json!({"k": "v"})).unwrap());
        let walked = Engine::default()
            .walk(&spec, Some(state.clone()), Some(&json!({"event": "close"})))
            .unwrap();
        assert!(!walked.transitioned());
        assert!(!walked.consumed);
        assert_eq!(walked.to, state);
        assert!(walked.emitted.is_empty());
    }

    #[test]
    fn test_structural_error_aborts_walk() {
        let spec = spec(json!({"nodes": {
            "start": {"branching": {"branches": [{"target": "bad"}]}},
            "bad": {"action": {"interpreter": "perl", "source": "1"}}
        }}));
        let err = Engine::default().walk(&spec, None, None).unwrap_err();
        assert_eq!(err.error_code(), "BAD_INTERPRETER");
    }

    #[test]
    fn test_timers_collected() {
        let spec = spec(json!({"nodes": {
            "start": {"branching": {"branches": [{"target": "wait"}]}},
            "wait": {"timer": {"id": "timeout", "delay": 100}}
        }}));
        let walked = Engine::default().walk(&spec, None, None).unwrap();
        assert_eq!(walked.to.node, "wait");
        assert_eq!(walked.timers.len(), 1);
        assert_eq!(walked.timers[0].id, "timeout");
    }
}
