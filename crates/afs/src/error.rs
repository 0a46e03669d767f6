use afs_config::ConfigError;
use afs_core::StorageError;

/// Errors raised while assembling or addressing drives.
#[derive(Debug, thiserror::Error)]
pub enum AfsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("A file system named '{0}' is already registered")]
    DuplicateFileSystem(String),

    #[error("No file system named '{0}'")]
    UnknownFileSystem(String),

    #[error("Invalid node path '{0}', expected <drive>:/<path>")]
    InvalidPath(String),
}

impl AfsError {
    pub fn is_not_found(&self) -> bool {
        match self {
            AfsError::Storage(e) => e.is_not_found(),
            AfsError::UnknownFileSystem(_) => true,
            _ => false,
        }
    }
}
