//! A single transition attempt.

use crate::bindings::Bindings;
use crate::engine::Engine;
use crate::error::CoreError;
use crate::spec::{Action, Branch, BranchingKind, Spec, Timer};
use crate::value::{as_f64, is_truthy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;

/// Where a machine is: its node and its bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    pub node: String,
    #[serde(default, alias = "bs")]
    pub bindings: Bindings,
}

impl MachineState {
    pub fn new(node: impl Into<String>, bindings: Bindings) -> Self {
        Self {
            node: node.into(),
            bindings,
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new(crate::walk::START_NODE, Bindings::new())
    }
}

/// Result of a step that took a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Stepped {
    pub to: MachineState,
    /// True when a message-gated branch fired.
    pub consumed: bool,
    /// Messages emitted by the node's actions.
    pub emitted: Vec<Value>,
}

/// A timer armed during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedTimer {
    pub id: String,
    pub delay: Duration,
}

/// Receives timers armed during a step.
pub trait TimerSink {
    fn arm(&mut self, timer: ArmedTimer);
}

impl TimerSink for Vec<ArmedTimer> {
    fn arm(&mut self, timer: ArmedTimer) {
        self.push(timer);
    }
}

impl Engine {
    /// Attempts one transition out of `state.node`.
    ///
    /// Runs the node's actions, arms its timers, then tries each branch in
    /// order. Returns `Ok(None)` when the machine rests at its node. Errors
    /// are structural: missing node, unknown interpreter, ambiguous match.
    pub fn step(
        &self,
        spec: &Spec,
        state: &MachineState,
        message: Option<&Value>,
        timers: &mut dyn TimerSink,
    ) -> Result<Option<Stepped>, CoreError> {
        let _timing = self.timings().start("step");

        let node = spec
            .node(&state.node)
            .ok_or_else(|| CoreError::NodeNotFound {
                node: state.node.clone(),
            })?;

        let mut bindings = state.bindings.clone();
        let mut emitted = Vec::new();

        for action in &node.actions {
            let outcome = self.run_action(action, &bindings)?;
            match action {
                Action::Script { .. } => emitted = outcome.emitted,
                Action::Builtin { .. } => emitted.extend(outcome.emitted),
            }
            bindings = match outcome.bindings {
                Some(next) => next,
                None => {
                    tracing::warn!(node = %state.node, "action produced no bindings");
                    bindings.with_error("action produced no bindings")
                }
            };
        }

        for timer in &node.timers {
            self.arm_timer(timer, &bindings, timers);
        }

        let Some(branching) = &node.branching else {
            return Ok(None);
        };

        let subject = match branching.kind {
            BranchingKind::Message => match message {
                Some(message) => Cow::Borrowed(message),
                None => return Ok(None),
            },
            BranchingKind::Spontaneous => Cow::Owned(bindings.to_value()),
        };

        for (index, branch) in branching.branches.iter().enumerate() {
            let Some(next) = self.try_branch(branch, &subject, &bindings)? else {
                tracing::trace!(node = %state.node, branch = index, "branch skipped");
                continue;
            };

            if let Some(timer) = branch.target.timer() {
                self.arm_timer(timer, &next, timers);
            }

            let dest = branch.target.dest();
            tracing::debug!(from = %state.node, to = %dest, branch = index, "transition");

            return Ok(Some(Stepped {
                to: MachineState::new(dest, next),
                consumed: branching.kind == BranchingKind::Message,
                emitted,
            }));
        }

        Ok(None)
    }

    /// Pattern, then guard, then test. Returns the branch's bindings on success.
    fn try_branch(
        &self,
        branch: &Branch,
        subject: &Value,
        bindings: &Bindings,
    ) -> Result<Option<Bindings>, CoreError> {
        let mut current = Cow::Borrowed(bindings);

        if let Some(pattern) = &branch.pattern {
            let mut found = self.matcher().matches(pattern, subject, &current);
            if found.len() > 1 {
                return Err(CoreError::AmbiguousMatch { count: found.len() });
            }
            match found.pop() {
                Some(matched) => current = Cow::Owned(matched),
                None => return Ok(None),
            }
        }

        if let Some(guard) = &branch.guard {
            let outcome = self.run_action(guard, &current)?;
            if !outcome.succeeded() {
                return Ok(None);
            }
            if let Some(guarded) = outcome.bindings {
                current = Cow::Owned(guarded);
            }
        }

        if let Some(test) = &branch.test {
            let passed = self
                .evaluator()
                .evaluate_statement(&current, test)
                .map(|v| is_truthy(&v))
                .unwrap_or(false);
            if !passed {
                return Ok(None);
            }
        }

        Ok(Some(current.into_owned()))
    }

    /// Evaluates the timer's delay; a positive finite number of
    /// milliseconds arms it.
    fn arm_timer(&self, timer: &Timer, bindings: &Bindings, sink: &mut dyn TimerSink) {
        let delay = self.evaluator().evaluate_statement(bindings, &timer.delay);
        match delay.as_ref().and_then(as_f64) {
            Some(ms) if ms.is_finite() && ms > 0.0 => {
                tracing::debug!(timer = %timer.id, delay_ms = ms, "arming timer");
                sink.arm(ArmedTimer {
                    id: timer.id.clone(),
                    delay: Duration::from_micros((ms * 1000.0).round() as u64),
                });
            }
            _ => {
                tracing::debug!(timer = %timer.id, delay = ?delay, "timer delay unusable, not armed");
            }
        }
    }
}
