//! Error types for sharebox.

use thiserror::Error;

/// Common error type for sharebox.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A required request field is missing or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The tenant identifier is not filesystem-safe.
    #[error("invalid tenant id: {0}")]
    InvalidTenant(String),

    /// The item path is empty or tries to leave the tenant space.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The tenant has no storage space yet.
    #[error("user space not found")]
    SpaceNotFound,

    /// An item (or stored artifact) does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// An item already exists at the requested path.
    #[error("item already exists: {0}")]
    AlreadyExists(String),

    /// A folder still has children and cannot be deleted.
    #[error("folder is not empty: {0}")]
    FolderNotEmpty(String),

    /// The tenant has never attached metadata.
    #[error("no metadata found")]
    NoMetadataFile,

    /// The tenant's side-table has no record for the item.
    #[error("no metadata for item: {0}")]
    NoMetadataForItem(String),

    /// No active share link has this id.
    #[error("link not found")]
    LinkNotFound,

    /// The share link was past its expiration time.
    #[error("link has expired")]
    LinkExpired,

    /// A compression or archive job failed or never reported back.
    #[error("worker failure: {0}")]
    Worker(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted JSON document could not be read or written.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse error classes handed to the transport layer for status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Expired,
    WorkerFailure,
    IoFailure,
}

impl StorageError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::InvalidInput(_)
            | StorageError::InvalidTenant(_)
            | StorageError::InvalidPath(_)
            | StorageError::Config(_) => ErrorKind::InvalidInput,
            StorageError::SpaceNotFound
            | StorageError::NotFound(_)
            | StorageError::NoMetadataFile
            | StorageError::NoMetadataForItem(_)
            | StorageError::LinkNotFound => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) | StorageError::FolderNotEmpty(_) => {
                ErrorKind::Conflict
            }
            StorageError::LinkExpired => ErrorKind::Expired,
            StorageError::Worker(_) => ErrorKind::WorkerFailure,
            StorageError::Io(_) | StorageError::Serialization(_) => ErrorKind::IoFailure,
        }
    }
}

/// Result type alias for sharebox operations.
pub type Result<T> = std::result::Result<T, StorageError>;
