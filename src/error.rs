//! Error types for Depot
//!
//! All modules use `DepotResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Depot operations
pub type DepotResult<T> = Result<T, DepotError>;

/// All errors that can occur in Depot
#[derive(Error, Debug)]
pub enum DepotError {
    // Artifact errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact already exists: {0}")]
    ArtifactExists(String),

    #[error("Invalid artifact key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    // Mirroring errors
    #[error("Mirroring failed for {key}: {reason}")]
    MirroringFailed {
        key: String,
        reason: String,
        #[source]
        source: Option<Box<DepotError>>,
    },

    #[error("Remote source {source_name} failed: {reason}")]
    Remote { source_name: String, reason: String },

    #[error("Checksum mismatch for {descriptor}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        descriptor: String,
        expected: String,
        actual: String,
    },

    #[error("Size mismatch for {descriptor}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        descriptor: String,
        expected: u64,
        actual: u64,
    },

    // Sink errors
    #[error("Cannot {operation} sink for {artifact} in state {state}")]
    SinkState {
        artifact: String,
        operation: &'static str,
        state: String,
    },

    #[error("Sink for {0} cannot accept a write")]
    SinkUnavailable(String),

    // Store errors
    #[error("Store inconsistency: {0}")]
    Inconsistent(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML edit error: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl DepotError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a mirroring failure that wraps the underlying cause
    pub fn mirroring_failed(key: impl ToString, cause: DepotError) -> Self {
        Self::MirroringFailed {
            key: key.to_string(),
            reason: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    /// Create a remote source error
    pub fn remote(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Remote {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Check if a later attempt may succeed without local changes
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MirroringFailed { .. } | Self::Remote { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ArtifactExists(_) => Some("Read the existing artifact instead, or remove it first"),
            Self::MirroringFailed { .. } => {
                Some("The remote copy is unusable; retry once the remote repository is fixed")
            }
            Self::ArtifactNotFound(_) => Some("Check the key or configure [[remotes]] in config"),
            Self::Inconsistent(_) => Some("Run: depot verify --repair"),
            _ => None,
        }
    }
}
