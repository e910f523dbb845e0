use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Writing the value would exceed the slot capacity.
    #[error("Storage capacity exceeded: {size} bytes > {capacity} bytes")]
    CapacityExceeded { size: usize, capacity: usize },

    /// Key contains characters that are unsafe on the filesystem.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Import payload did not contain a usable image list.
    #[error("Invalid import payload: {0}")]
    InvalidImport(String),

    /// Generic I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
