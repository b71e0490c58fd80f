//! Error types for the identifier registry.
//!
//! Validation findings (orphans, unregistered live identifiers, duplicates held
//! by live objects) are not errors; they are reported as
//! [`Discrepancy`](crate::Discrepancy) values. Everything here aborts the
//! operation that produced it.

use crate::id::PersistentId;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    // Integrity errors
    #[error("Identifier {id} is already registered in scope '{existing_scope}'")]
    DuplicateIdentifier {
        id: PersistentId,
        existing_scope: String,
    },

    #[error("No free identifier found for scope '{scope}' after {attempts} attempts")]
    AllocationExhausted { scope: String, attempts: u32 },

    #[error("Unknown scope: {scope}")]
    UnknownScope { scope: String },

    #[error("Invalid identifier: {value}")]
    InvalidIdentifier { value: String },

    #[error("Invalid scope key: '{scope}'")]
    InvalidScope { scope: String },

    #[error("Object not found: {object}")]
    ObjectNotFound { object: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Registry is locked by another session: {0}")]
    Locked(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Unsupported registry format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("File watcher error: {message}")]
    Watch { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<notify::Error> for RegistryError {
    fn from(err: notify::Error) -> Self {
        RegistryError::Watch {
            message: err.to_string(),
        }
    }
}

impl RegistryError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RegistryError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Process exit code for command-line front ends.
    ///
    /// - 2: integrity violation (duplicate identifier)
    /// - 3: allocation exhausted
    /// - 4: unknown scope / object
    /// - 5: invalid input (identifier, scope key, config)
    /// - 6: registry locked by another session
    /// - 1: everything else
    pub fn exit_code(&self) -> i32 {
        match self {
            RegistryError::DuplicateIdentifier { .. } => 2,
            RegistryError::AllocationExhausted { .. } => 3,
            RegistryError::UnknownScope { .. } | RegistryError::ObjectNotFound { .. } => 4,
            RegistryError::InvalidIdentifier { .. }
            | RegistryError::InvalidScope { .. }
            | RegistryError::Config { .. }
            | RegistryError::UnsupportedVersion { .. } => 5,
            RegistryError::Locked(_) => 6,
            _ => 1,
        }
    }

    /// True for errors that signal a would-be break of global uniqueness.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, RegistryError::DuplicateIdentifier { .. })
    }
}
