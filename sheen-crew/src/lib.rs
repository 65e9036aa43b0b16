//! # sheen-crew
//!
//! Runs a crew of sheen machines against a shared message stream.
//!
//! This crate provides:
//! - The crew model and its JSON persistence
//! - Message routing and per-machine failure isolation
//! - Spec resolution with `${id}` templating and a checksum-keyed cache
//! - One-shot timers that re-enter as messages
//! - A single-consumer event loop with emission-triggered shutdown
//! - YAML configuration with environment overrides

pub mod config;
pub mod coordinator;
pub mod crew;
pub mod error;
pub mod runtime;
pub mod sink;
pub mod specs;
pub mod timers;

pub use config::{Config, ConfigError, CrewConfig, MachineConfig, RuntimeConfig, SpecsConfig};
pub use coordinator::{Coordinator, Dispatch, MachineFailure, ScheduledTimer};
pub use crew::{Crew, Machine, Routing, ROUTING_FIELD};
pub use error::CrewError;
pub use runtime::{is_shutdown, CrewRuntime, Event, RuntimeHandle, SHUTDOWN_DID};
pub use sink::{ChannelSink, EmissionSink};
pub use specs::{SpecLibrary, SpecSource, ID_PLACEHOLDER};
pub use timers::TimerScheduler;
