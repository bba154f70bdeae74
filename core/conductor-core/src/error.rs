//! Error types for conductor-core operations.
//!
//! Only caller mistakes and genuine I/O failures on the write path surface as
//! errors. Missing or half-written files on the read path degrade to defaults
//! and never reach this type.

use std::path::PathBuf;

/// All errors that can occur in conductor-core operations.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    // ─────────────────────────────────────────────────────────────────────
    // Caller Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No active project")]
    NoActiveProject,

    // ─────────────────────────────────────────────────────────────────────
    // Project Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Invalid project path: {path}: {reason}")]
    InvalidProjectPath { path: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Watch error: {context}: {source}")]
    Watch {
        context: String,
        #[source]
        source: notify::Error,
    },
}

impl ConductorError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConductorError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors a user can act on (bad input, unknown project).
    ///
    /// Clients show these as messages; everything else is rendered as
    /// "no data yet" or logged.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ConductorError::InvalidArgument(_)
                | ConductorError::NoActiveProject
                | ConductorError::ProjectNotFound(_)
                | ConductorError::InvalidProjectPath { .. }
        )
    }
}

/// Convenience type alias for Results using ConductorError.
pub type Result<T> = std::result::Result<T, ConductorError>;

impl From<ConductorError> for String {
    fn from(err: ConductorError) -> String {
        err.to_string()
    }
}
