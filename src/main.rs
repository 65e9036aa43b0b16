//! sheen - declarative, message-driven state machines
//!
//! Reads newline-delimited JSON messages on stdin, dispatches them to the
//! configured crew and writes every emitted message to stdout as one JSON
//! line. Logs go to stderr.

use serde_json::Value;
use sheen_core::Engine;
use sheen_crew::{ChannelSink, Config, Coordinator, CrewRuntime, RuntimeHandle};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (from file if SHEEN_CONFIG is set, then env overrides)
    let config_path = std::env::var(sheen_crew::config::CONFIG_ENV).ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    tracing::info!("Starting sheen");
    tracing::info!("  Specs directory: {}", config.specs.dir.display());
    tracing::info!(
        "  Spec cache: {}",
        if config.specs.cache { "enabled" } else { "disabled" }
    );
    tracing::info!("  Max steps per walk: {}", config.engine.max_steps);
    if config.engine.debug {
        tracing::info!("  Step tracing: enabled");
    }

    let crew = match config.crew.build_crew() {
        Ok(crew) => crew,
        Err(e) => {
            tracing::error!("Failed to load crew: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("  Crew: {} ({} machine(s))", crew.id, crew.len());

    let engine = Arc::new(Engine::new(config.engine));
    let coordinator = Coordinator::new(engine, Arc::new(config.specs.library()));

    // Emissions are written by a dedicated task so the event loop never blocks on stdout
    let (sink, mut emissions) = ChannelSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(message) = emissions.recv().await {
            println!("{}", message);
        }
    });

    let runtime = CrewRuntime::new(coordinator, crew, sink, &config.runtime);
    let handle = runtime.handle();

    if let Some(event) = &config.runtime.initial_event {
        tracing::info!("  Initial event: {}", event);
        handle.send(serde_json::json!({ "event": event })).await?;
    }

    // Feed stdin into the runtime
    let reader = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = read_messages(reader).await {
            tracing::error!("Failed to read input: {}", e);
        }
    });

    // Spawn shutdown signal handler
    let signal = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping crew...");
        signal.shutdown("signal").await.ok();
    });

    // Run the crew (blocks until shutdown)
    let (crew, sink) = runtime.run().await;

    drop(sink);
    let _ = printer.await;

    match crew.to_json() {
        Ok(json) => tracing::info!("Final crew: {}", json),
        Err(e) => tracing::error!("Failed to serialize crew: {}", e),
    }

    tracing::info!("sheen stopped");
    Ok(())
}

/// Forwards each non-empty stdin line, parsed as JSON, to the runtime.
async fn read_messages(handle: RuntimeHandle) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring malformed message: {}", e);
                continue;
            }
        };
        if handle.send(message).await.is_err() {
            break;
        }
    }

    tracing::info!("Input closed");
    Ok(())
}
