//! Error types for mizdb-maint

use crate::protection::ProtectionError;
use thiserror::Error;

/// Maintenance operation error
#[derive(Debug, Error)]
pub enum MaintError {
    /// Records cannot be deleted because protected relations still point at them
    #[error(transparent)]
    Protected(#[from] ProtectionError),

    /// Table or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (mismatched tables, unknown fields, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// mizdb-common error
    #[error("Common error: {0}")]
    Common(#[from] mizdb_common::Error),
}

/// Result type for maintenance operations
pub type Result<T> = std::result::Result<T, MaintError>;
