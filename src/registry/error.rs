//! Registry error taxonomy.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Failures touching the persisted registry document.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Opening, writing, syncing or renaming a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document exists but is not valid YAML for the registry schema.
    #[error("failed to decode registry document: {0}")]
    Decode(#[source] serde_yaml::Error),

    /// The snapshot could not be serialized.
    #[error("failed to encode registry snapshot: {0}")]
    Encode(#[source] serde_yaml::Error),

    /// The document decoded but breaks a registry invariant.
    #[error("invalid registry document: {0}")]
    Invalid(String),

    /// The persistence worker has shut down.
    #[error("persistence worker is not running")]
    Closed,

    /// A blocking file task panicked or was cancelled.
    #[error("persistence task failed: {0}")]
    Task(String),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed input (empty name, bad URL, bad address).
    #[error("{0}")]
    Validation(String),

    /// Duplicate source address or client key.
    #[error("{0}")]
    Conflict(String),

    #[error("client {0} not found")]
    NotFound(u64),

    /// The mutation was applied in memory but could not be written to disk.
    #[error("failed to persist registry: {0}")]
    Persistence(Arc<PersistenceError>),
}

impl From<PersistenceError> for RegistryError {
    fn from(err: PersistenceError) -> Self {
        RegistryError::Persistence(Arc::new(err))
    }
}

impl From<Arc<PersistenceError>> for RegistryError {
    fn from(err: Arc<PersistenceError>) -> Self {
        RegistryError::Persistence(err)
    }
}
