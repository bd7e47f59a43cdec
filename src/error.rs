//! Error types for the sync engine and its store adapters.

use crate::types::EntityKey;
use thiserror::Error;

/// Errors raised by a store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Entity not found: {0}")]
    NotFound(EntityKey),

    #[error("Query failed: {0}")]
    Query(String),
}

/// Main error type for sync engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model {model} is already registered for {existing}, cannot bind {attempted}")]
    RegistrationConflict {
        model: String,
        existing: &'static str,
        attempted: &'static str,
    },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sync service stopped")]
    ServiceStopped,
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
