//! Crew coordinator: routes one message to its target machines, walks each,
//! and commits the results.

use crate::crew::{Crew, Machine};
use crate::error::CrewError;
use crate::specs::SpecSource;
use serde_json::{json, Value};
use sheen_core::{Engine, Walked};
use std::sync::Arc;
use std::time::Duration;

/// A timer armed by a machine during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimer {
    pub machine_id: String,
    pub timer_id: String,
    pub delay: Duration,
}

impl ScheduledTimer {
    /// The event delivered when the timer fires.
    pub fn event(&self) -> Value {
        json!({"to": self.machine_id, "event": self.timer_id})
    }
}

/// A structural failure confined to one machine.
#[derive(Debug)]
pub struct MachineFailure {
    pub machine_id: String,
    pub error: CrewError,
}

/// Outcome of dispatching one message.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Machines the message was routed to, in processing order.
    pub targets: Vec<String>,
    /// Emissions of all machines, in processing order.
    pub emitted: Vec<Value>,
    pub timers: Vec<ScheduledTimer>,
    pub failures: Vec<MachineFailure>,
    /// Machines whose walk hit the step bound.
    pub limited: Vec<String>,
    /// Machines whose state was committed.
    pub transitioned: Vec<String>,
}

impl Dispatch {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.limited.is_empty()
    }
}

/// Drives a crew one message at a time.
pub struct Coordinator {
    engine: Arc<Engine>,
    specs: Arc<dyn SpecSource>,
}

impl Coordinator {
    pub fn new(engine: Arc<Engine>, specs: Arc<dyn SpecSource>) -> Self {
        Self { engine, specs }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Dispatches `message` to its targets in `crew` and commits every
    /// machine that transitioned.
    ///
    /// A failing machine is reported in the result and left untouched; its
    /// siblings are processed as usual.
    pub fn dispatch(&self, crew: &mut Crew, message: &Value) -> Dispatch {
        let targets = crew.targets(message);
        tracing::debug!(crew = %crew.id, targets = ?targets, "routing message");

        let mut dispatch = Dispatch::default();
        let mut walks = Vec::with_capacity(targets.len());

        for id in &targets {
            let Some(machine) = crew.machine(id) else {
                continue;
            };
            match self.walk_machine(id, machine, message) {
                Ok(walked) => walks.push((id.clone(), walked)),
                Err(error) => {
                    tracing::warn!(
                        machine = %id,
                        code = error.error_code(),
                        error = %error,
                        "machine failed"
                    );
                    dispatch.failures.push(MachineFailure {
                        machine_id: id.clone(),
                        error,
                    });
                }
            }
        }

        for (id, walked) in walks {
            dispatch.emitted.extend(walked.emitted.iter().cloned());
            dispatch
                .timers
                .extend(walked.timers.iter().map(|timer| ScheduledTimer {
                    machine_id: id.clone(),
                    timer_id: timer.id.clone(),
                    delay: timer.delay,
                }));

            if walked.is_limited() {
                tracing::warn!(machine = %id, "hit step limit");
                dispatch.limited.push(id.clone());
            }

            if walked.transitioned() {
                if let Some(machine) = crew.machines.get_mut(&id) {
                    machine.commit(walked);
                    dispatch.transitioned.push(id);
                }
            }
        }

        dispatch.targets = targets;
        dispatch
    }

    /// Pure form of [`dispatch`](Self::dispatch): returns the updated crew
    /// and leaves the input alone.
    pub fn process_event(&self, crew: &Crew, message: &Value) -> (Crew, Dispatch) {
        let mut next = crew.clone();
        let dispatch = self.dispatch(&mut next, message);
        (next, dispatch)
    }

    fn walk_machine(&self, id: &str, machine: &Machine, message: &Value) -> Result<Walked, CrewError> {
        let spec = self.specs.resolve(&machine.spec, id)?;
        Ok(self.engine.walk(&spec, Some(machine.state()), Some(message))?)
    }
}
