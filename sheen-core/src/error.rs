//! Core error types.

use thiserror::Error;

/// Structural errors from the state machine core.
///
/// Every variant is fatal to the affected machine's current dispatch.
/// Script failures never surface here; they are folded into bindings.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("node not found: {node}")]
    NodeNotFound { node: String },

    #[error("bad interpreter: '{interpreter}'")]
    BadInterpreter { interpreter: String },

    #[error("too many sets of bindings: {count}")]
    AmbiguousMatch { count: usize },

    #[error("invalid branch target: {reason}")]
    InvalidTarget { reason: String },

    #[error("invalid spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns an error code suitable for logs and reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::NodeNotFound { .. } => "NODE_NOT_FOUND",
            CoreError::BadInterpreter { .. } => "BAD_INTERPRETER",
            CoreError::AmbiguousMatch { .. } => "AMBIGUOUS_MATCH",
            CoreError::InvalidTarget { .. } => "INVALID_TARGET",
            CoreError::InvalidSpec { .. } => "INVALID_SPEC",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}
