use thiserror::Error;

/// Errors that can occur when interacting with the video record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Store operation failed: {0}")]
    Operation(String),

    #[error("Record {0} already exists")]
    AlreadyExists(String),

    #[error("Record {0} not found")]
    NotFound(String),

    #[error("Store is locked")]
    Locked,
}
