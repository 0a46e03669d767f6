use std::io;

use crate::id::NodeId;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A node, or a dependency that had to exist, is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A sibling with the same name already exists.
    #[error("Node {parent} already has a child named '{name}'")]
    AlreadyExists { parent: String, name: String },

    /// Mutating call on a backend that cannot perform it.
    #[error("Operation '{operation}' is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    /// Blob or backing file IO failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A node id string that does not belong to this backend.
    #[error("Invalid node reference '{id}' for the {backend} backend")]
    InvalidReference { id: String, backend: &'static str },

    /// Structurally forbidden change, such as deleting the root.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The storage has been closed.
    #[error("Storage '{0}' is closed")]
    Closed(String),

    /// The embedded engine failed.
    #[error("Storage engine '{backend}' failed: {source}")]
    Engine {
        backend: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the storage API.
pub type Result<T, E = StorageError> = std::result::Result<T, E>;

impl StorageError {
    pub fn node_not_found(id: &NodeId) -> Self {
        StorageError::NotFound(format!("node {}", id))
    }

    pub fn already_exists(parent: &NodeId, name: &str) -> Self {
        StorageError::AlreadyExists {
            parent: parent.to_string(),
            name: name.to_string(),
        }
    }

    pub fn unsupported(operation: &'static str, backend: &'static str) -> Self {
        StorageError::Unsupported { operation, backend }
    }

    pub fn engine(
        backend: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StorageError::Engine {
            backend,
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, StorageError::Unsupported { .. })
    }
}

impl From<StorageError> for io::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(io_err) => io_err,
            StorageError::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, e),
            StorageError::Unsupported { .. } => io::Error::new(io::ErrorKind::Unsupported, e),
            other => io::Error::other(other),
        }
    }
}
