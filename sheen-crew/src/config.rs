//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SHEEN_CONFIG)
//! 3. Environment variables

use crate::crew::{Crew, Machine};
use crate::error::CrewError;
use crate::specs::SpecLibrary;
use serde::{Deserialize, Serialize};
use sheen_core::{Bindings, EngineConfig};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SHEEN_CONFIG";

/// Runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Step engine configuration.
    pub engine: EngineConfig,
    /// Spec resolution.
    pub specs: SpecsConfig,
    /// Initial crew.
    pub crew: CrewConfig,
    /// Event loop.
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        apply_engine_env_overrides(&mut self.engine);
        self.specs.apply_env_overrides();
        self.crew.apply_env_overrides();
        self.runtime.apply_env_overrides();
    }

    /// Checks values that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.runtime.stop_event.is_empty() {
            return Err(ConfigError::ValidationError(
                "runtime.stop_event must not be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for machine in &self.crew.machines {
            if machine.id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "crew.machines entry with empty id".to_string(),
                ));
            }
            if !seen.insert(machine.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate machine id in crew.machines: {}",
                    machine.id
                )));
            }
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

fn apply_engine_env_overrides(engine: &mut EngineConfig) {
    if let Ok(max) = std::env::var("SHEEN_MAX_STEPS") {
        if let Ok(n) = max.parse() {
            engine.max_steps = n;
        }
    }

    if let Ok(debug) = std::env::var("SHEEN_DEBUG") {
        engine.debug = debug == "1" || debug.to_lowercase() == "true";
    }
}

/// Spec resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecsConfig {
    /// Directory relative spec references are resolved against.
    pub dir: PathBuf,
    /// Cache parsed specs by (reference, content checksum).
    pub cache: bool,
}

impl Default for SpecsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./specs"),
            cache: true,
        }
    }
}

impl SpecsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SHEEN_SPECS_DIR") {
            self.dir = PathBuf::from(dir);
        }

        if let Ok(cache) = std::env::var("SHEEN_SPEC_CACHE") {
            self.cache = cache == "1" || cache.to_lowercase() == "true";
        }
    }

    /// Builds the spec library this configuration describes.
    pub fn library(&self) -> SpecLibrary {
        let library = SpecLibrary::new(&self.dir);
        if self.cache {
            library
        } else {
            library.without_cache()
        }
    }
}

/// A machine declared inline in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub id: String,
    pub spec: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default)]
    pub bindings: Bindings,
}

/// Initial crew configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrewConfig {
    /// Persisted crew (JSON) to start from.
    pub file: Option<PathBuf>,
    /// Crew id when no file is given.
    pub id: String,
    /// Machines added on top of the file's.
    pub machines: Vec<MachineConfig>,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            file: None,
            id: "crew".to_string(),
            machines: Vec::new(),
        }
    }
}

impl CrewConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SHEEN_CREW") {
            self.file = Some(PathBuf::from(path));
        }
    }

    /// Builds the starting crew: the persisted file if any, then the inline
    /// machines (which replace same-id machines from the file).
    pub fn build_crew(&self) -> Result<Crew, CrewError> {
        let mut crew = match &self.file {
            Some(path) => Crew::from_file(path)?,
            None => Crew::new(self.id.clone()),
        };

        for entry in &self.machines {
            let mut machine = Machine::new(entry.spec.clone());
            if let Some(node) = &entry.node {
                machine.node = node.clone();
            }
            machine.bindings = entry.bindings.clone();
            crew.add_machine(entry.id.clone(), machine);
        }

        Ok(crew)
    }
}

/// Event loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bound of the inbound event queue.
    pub queue_capacity: usize,
    /// Event name dispatched to every machine on shutdown.
    pub stop_event: String,
    /// Event name dispatched once at startup, if set.
    pub initial_event: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            stop_event: "stop".to_string(),
            initial_event: None,
        }
    }
}

impl RuntimeConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(capacity) = std::env::var("SHEEN_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
