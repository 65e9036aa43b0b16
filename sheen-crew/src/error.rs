//! Crew error types.

use sheen_core::CoreError;
use thiserror::Error;

/// Crew errors.
#[derive(Debug, Error)]
pub enum CrewError {
    #[error("spec not found: {reference}")]
    SpecNotFound { reference: String },

    #[error("failed to load spec '{reference}': {reason}")]
    SpecLoad { reference: String, reason: String },

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("crew shutting down")]
    ShuttingDown,
}

impl CrewError {
    /// Returns an error code suitable for logs and reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            CrewError::SpecNotFound { .. } => "SPEC_NOT_FOUND",
            CrewError::SpecLoad { .. } => "SPEC_LOAD_FAILED",
            CrewError::Core(e) => e.error_code(),
            CrewError::Io(_) => "INTERNAL_ERROR",
            CrewError::Json(_) | CrewError::Yaml(_) => "BAD_REQUEST",
            CrewError::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}
