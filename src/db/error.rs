use thiserror::Error;

use crate::models::EntityType;

/// Failures of the persistence collaborator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// A database operation failed.
    #[error("database operation failed: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored document exists but cannot be decoded.
    #[error("corrupt {entity_type} document {id}: {source}")]
    Corrupt {
        entity_type: EntityType,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A document could not be encoded for storage.
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
