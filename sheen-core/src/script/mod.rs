//! Script evaluation for actions, guards, tests and timer delays.
//!
//! The step engine only talks to [`ScriptEvaluator`]. [`SandboxEvaluator`] is
//! the bundled implementation: a small expression/statement language with a
//! fresh environment per call. Scripts see:
//!
//! - `bindings` (or `_.bindings`): the current bindings, writable in actions
//! - `_.out(msg)`: queue an outbound message (actions only)
//! - `_.log(...)`: log each argument
//! - `_.genRandomId(n)`, `_.generateRandomInt(min, max)`,
//!   `_.generateRandomString(n)`: random helpers
//! - `_.lookup(path)`: the external value hook
//!
//! ```text
//! bindings.count += 1;
//! if (bindings.count > 3) { _.out({"did": "alert", "count": bindings.count}); }
//! ```

mod interp;
mod parser;

use crate::bindings::Bindings;
use crate::timings::Timings;
use interp::{Frame, Mode};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub use parser::{parse_expression, parse_program};

/// Errors raised inside embedded script source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("syntax error at offset {pos}: {reason}")]
    Syntax { pos: usize, reason: String },

    #[error("{0}")]
    Runtime(String),
}

/// Result of evaluating an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    /// New bindings. `None` when the action produced no usable bindings.
    pub bindings: Option<Bindings>,
    /// Messages emitted, in order.
    pub emitted: Vec<Value>,
    /// Evaluation error, if any. When set, `bindings` carries it under the
    /// error key.
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok(bindings: Bindings, emitted: Vec<Value>) -> Self {
        Self {
            bindings: Some(bindings),
            emitted,
            error: None,
        }
    }

    /// Leaves the bindings as they were.
    pub fn unchanged(bindings: &Bindings) -> Self {
        Self::ok(bindings.clone(), Vec::new())
    }

    /// A recovered failure: the prior bindings with the error recorded.
    pub fn failed(bindings: &Bindings, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            bindings: Some(bindings.clone().with_error(error.clone())),
            emitted: Vec::new(),
            error: Some(error),
        }
    }

    /// True when the action produced bindings without error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.bindings.is_some()
    }
}

/// Executes embedded source against bindings.
///
/// Both operations are synchronous and must not retain state between calls.
pub trait ScriptEvaluator: Send + Sync {
    /// Runs action source. Errors are captured in the outcome, never raised.
    fn evaluate_action(&self, bindings: &Bindings, source: &str) -> ActionOutcome;

    /// Evaluates an expression against a read-only view of the bindings.
    /// Returns `None` on failure.
    fn evaluate_statement(&self, bindings: &Bindings, source: &str) -> Option<Value>;
}

/// External value hook reachable from scripts as `_.lookup(path)`.
pub trait ValueLookup: Send + Sync {
    fn lookup(&self, path: &str) -> Option<Value>;
}

/// Lookup that knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLookup;

impl ValueLookup for NullLookup {
    fn lookup(&self, _path: &str) -> Option<Value> {
        None
    }
}

impl<F> ValueLookup for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn lookup(&self, path: &str) -> Option<Value> {
        self(path)
    }
}

/// The bundled script evaluator.
pub struct SandboxEvaluator {
    rng: Mutex<StdRng>,
    lookup: Arc<dyn ValueLookup>,
    timings: Option<Arc<Timings>>,
}

impl SandboxEvaluator {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Evaluator whose random helpers are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            lookup: Arc::new(NullLookup),
            timings: None,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ValueLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_timings(mut self, timings: Arc<Timings>) -> Self {
        self.timings = Some(timings);
        self
    }

    fn run_action(&self, bindings: &Bindings, source: &str) -> Result<ActionOutcome, ScriptError> {
        let program = parse_program(source)?;
        let run = Frame::new(self, Mode::Action, bindings.to_value()).run(&program)?;
        Ok(ActionOutcome {
            bindings: Bindings::from_value(run.result),
            emitted: run.emitted,
            error: None,
        })
    }

    fn run_statement(&self, bindings: &Bindings, source: &str) -> Result<Value, ScriptError> {
        let expr = parse_expression(source)?;
        Frame::new(self, Mode::Statement, bindings.to_value()).eval(&expr)
    }
}

impl Default for SandboxEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SandboxEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxEvaluator")
            .field("timings", &self.timings.is_some())
            .finish_non_exhaustive()
    }
}

impl ScriptEvaluator for SandboxEvaluator {
    fn evaluate_action(&self, bindings: &Bindings, source: &str) -> ActionOutcome {
        let _timing = self.timings.as_deref().map(|t| t.start("sandbox"));
        match self.run_action(bindings, source) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "action evaluation failed");
                ActionOutcome::failed(bindings, e.to_string())
            }
        }
    }

    fn evaluate_statement(&self, bindings: &Bindings, source: &str) -> Option<Value> {
        let _timing = self.timings.as_deref().map(|t| t.start("sandboxStatement"));
        match self.run_statement(bindings, source) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, source, "statement evaluation failed");
                None
            }
        }
    }
}
