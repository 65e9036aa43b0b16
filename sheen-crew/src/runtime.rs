//! Crew event loop.
//!
//! All inbound traffic (external messages, fired timers, shutdown requests)
//! goes through one bounded queue and is processed strictly one event at a
//! time. Each event is dispatched to the crew, its timers are armed and its
//! emissions are handed to the sink.
//!
//! An emission whose `did` field is `"shutdown"` stops the runtime: the stop
//! event is dispatched once to every machine, outstanding timers are
//! cancelled and a timing summary is logged.

use crate::config::RuntimeConfig;
use crate::coordinator::{Coordinator, Dispatch, ScheduledTimer};
use crate::crew::Crew;
use crate::error::CrewError;
use crate::sink::EmissionSink;
use crate::timers::TimerScheduler;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Value of `did` that requests a shutdown.
pub const SHUTDOWN_DID: &str = "shutdown";

/// Returns true when an emitted message requests a shutdown.
pub fn is_shutdown(message: &Value) -> bool {
    message.get("did").and_then(Value::as_str) == Some(SHUTDOWN_DID)
}

/// An entry on the runtime's queue.
#[derive(Debug)]
pub enum Event {
    Message(Value),
    Timer(ScheduledTimer),
    Shutdown { reason: String },
}

/// Cloneable handle for feeding a running [`CrewRuntime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    events: mpsc::Sender<Event>,
}

impl RuntimeHandle {
    /// Queues an external message.
    pub async fn send(&self, message: Value) -> Result<(), CrewError> {
        self.events
            .send(Event::Message(message))
            .await
            .map_err(|_| CrewError::ShuttingDown)
    }

    /// Asks the runtime to stop.
    pub async fn shutdown(&self, reason: impl Into<String>) -> Result<(), CrewError> {
        self.events
            .send(Event::Shutdown {
                reason: reason.into(),
            })
            .await
            .map_err(|_| CrewError::ShuttingDown)
    }
}

/// Owns a crew and processes its events in arrival order.
pub struct CrewRuntime<S: EmissionSink> {
    coordinator: Coordinator,
    crew: Crew,
    sink: S,
    timers: TimerScheduler,
    events: mpsc::Receiver<Event>,
    handle: RuntimeHandle,
    stop_event: String,
    stopping: bool,
}

impl<S: EmissionSink> CrewRuntime<S> {
    pub fn new(coordinator: Coordinator, crew: Crew, sink: S, config: &RuntimeConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            coordinator,
            crew,
            sink,
            timers: TimerScheduler::new(tx.clone()),
            events: rx,
            handle: RuntimeHandle { events: tx },
            stop_event: config.stop_event.clone(),
            stopping: false,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    pub fn crew(&self) -> &Crew {
        &self.crew
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Number of armed timers that have not fired.
    pub fn pending_timers(&self) -> usize {
        self.timers.outstanding()
    }

    /// Dispatches one message, arms its timers and delivers its emissions.
    ///
    /// Timers are not armed once the runtime is stopping, nor when called
    /// outside a tokio runtime.
    pub fn process(&mut self, message: &Value) -> Dispatch {
        let dispatch = self.coordinator.dispatch(&mut self.crew, message);

        if !self.stopping {
            for timer in &dispatch.timers {
                self.timers.schedule(timer.clone());
            }
        }

        let mut shutdown = false;
        for emitted in &dispatch.emitted {
            self.sink.deliver(emitted);
            shutdown |= is_shutdown(emitted);
        }

        if shutdown {
            self.stop("shutdown emitted");
        }
        dispatch
    }

    /// Stops the runtime. Calling it again has no effect.
    pub fn stop(&mut self, reason: &str) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        tracing::info!("auto-stopping ({})", reason);

        let stop = json!({ "event": self.stop_event });
        let dispatch = self.process(&stop);
        if !dispatch.is_clean() {
            tracing::warn!(
                "stop event: {} failure(s), {} limited walk(s)",
                dispatch.failures.len(),
                dispatch.limited.len()
            );
        }

        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            tracing::info!("cancelled {} pending timer(s)", cancelled);
        }

        tracing::info!(
            "Performance summary:\n{}",
            self.coordinator.engine().timings().summary()
        );
    }

    /// Runs until stopped. Returns the final crew and the sink.
    pub async fn run(mut self) -> (Crew, S) {
        while !self.stopping {
            let Some(event) = self.events.recv().await else {
                break;
            };
            match event {
                Event::Message(message) => {
                    self.process(&message);
                }
                Event::Timer(timer) => {
                    tracing::debug!(machine = %timer.machine_id, timer = %timer.timer_id, "dispatching timer");
                    self.process(&timer.event());
                }
                Event::Shutdown { reason } => self.stop(&reason),
            }
        }

        let Self { crew, sink, .. } = self;
        (crew, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::Machine;
    use crate::specs::SpecLibrary;
    use sheen_core::{Bindings, Engine, EngineConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn blinker() -> Value {
        json!({"nodes": {
            "start": {"branching": {"type": "message", "branches": [
                {"pattern": {"event": "start"}, "target": "armed"}
            ]}},
            "armed": {
                "timer": {"id": "tick", "delay": 100},
                "branching": {"type": "message", "branches": [
                    {"pattern": {"event": "tick"}, "target": "fired"}
                ]}
            },
            "fired": {
                "action": {"interpreter": "ecmascript", "source": "_.out({did: 'fired'}); _.out({did: 'shutdown'});"},
                "branching": {"branches": [{"target": "done"}]}
            },
            "done": {"branching": {"type": "message", "branches": [
                {"pattern": {"event": "stop"}, "target": "stopped"}
            ]}},
            "stopped": {
                "action": {"interpreter": "ecmascript", "source": "_.out({did: 'stopped'});"},
                "branching": {"branches": [{"target": "end"}]}
            },
            "end": {}
        }})
    }

    fn runtime(machine: Machine) -> CrewRuntime<Vec<Value>> {
        let library = SpecLibrary::new(".");
        library.insert("blinker", &blinker());
        let coordinator = Coordinator::new(
            Arc::new(Engine::new(EngineConfig::default())),
            Arc::new(library),
        );
        let mut crew = Crew::new("test");
        crew.add_machine("m", machine);
        CrewRuntime::new(coordinator, crew, Vec::new(), &RuntimeConfig::default())
    }

    fn did(messages: &[Value]) -> Vec<&str> {
        messages
            .iter()
            .filter_map(|m| m.get("did").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn test_is_shutdown() {
        assert!(is_shutdown(&json!({"did": "shutdown"})));
        assert!(!is_shutdown(&json!({"did": "shutdown!"})));
        assert!(!is_shutdown(&json!({"event": "shutdown"})));
        assert!(!is_shutdown(&json!("shutdown")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_driven_shutdown() {
        let runtime = runtime(Machine::new("blinker"));
        let handle = runtime.handle();
        handle.send(json!({"event": "start"})).await.unwrap();

        let started = tokio::time::Instant::now();
        let (crew, sink) = runtime.run().await;

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(did(&sink), vec!["fired", "shutdown", "stopped"]);
        assert_eq!(crew.machine("m").unwrap().node, "end");

        // The queue is gone once the runtime has returned.
        assert!(handle.send(json!({"event": "late"})).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let mut runtime = runtime(Machine::new("blinker").with_state("done", Bindings::new()));
        runtime.stop("first");
        runtime.stop("second");

        assert!(runtime.is_stopping());
        assert_eq!(did(runtime.sink()), vec!["stopped"]);
        assert_eq!(runtime.crew().machine("m").unwrap().node, "end");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timers_armed_while_stopping() {
        let mut runtime = runtime(Machine::new("blinker"));
        runtime.process(&json!({"event": "start"}));
        assert_eq!(runtime.pending_timers(), 1);

        runtime.stop("test");
        assert_eq!(runtime.pending_timers(), 0);

        // The machine rests in "armed", which would re-arm its timer.
        let dispatch = runtime.process(&json!({"event": "other"}));
        assert_eq!(dispatch.timers.len(), 1);
        assert_eq!(runtime.pending_timers(), 0);
    }

    #[test]
    fn test_process_outside_runtime() {
        let mut runtime = runtime(Machine::new("blinker"));
        let dispatch = runtime.process(&json!({"event": "start"}));
        assert_eq!(dispatch.timers.len(), 1);
        assert_eq!(runtime.pending_timers(), 0);
        assert_eq!(runtime.crew().machine("m").unwrap().node, "armed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_via_handle() {
        let runtime = runtime(Machine::new("blinker"));
        let handle = runtime.handle();
        handle.shutdown("operator").await.unwrap();

        let (crew, sink) = runtime.run().await;
        assert!(sink.is_empty());
        assert_eq!(crew.machine("m").unwrap().node, "start");
    }
}
