//! # sheen-core
//!
//! State machine core for sheen.
//!
//! This crate provides:
//! - Spec parsing and structural validation
//! - Structural pattern matching with unification
//! - Embedded script evaluation for actions, guards and tests
//! - The step engine and the walk driver
//! - Built-in action handlers

pub mod actions;
pub mod bindings;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod script;
pub mod spec;
pub mod step;
pub mod timings;
pub mod value;
pub mod walk;

pub use actions::{ActionHandler, ActionRegistry};
pub use bindings::Bindings;
pub use engine::{Engine, EngineConfig};
pub use error::CoreError;
pub use matcher::{matches, PatternMatcher};
pub use script::{ActionOutcome, NullLookup, SandboxEvaluator, ScriptError, ScriptEvaluator, ValueLookup};
pub use spec::{Action, Branch, Branching, BranchingKind, Node, Spec, Target, Timer};
pub use step::{ArmedTimer, MachineState, Stepped, TimerSink};
pub use timings::{Timing, Timings};
pub use walk::{StopReason, Walked, START_NODE};
