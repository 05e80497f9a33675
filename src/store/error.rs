use thiserror::Error;

use crate::db::PersistenceError;
use crate::models::{EntityType, SubItemKind, UnknownEntityType};
use crate::supersession::SupersessionError;

/// Entity store failures.
///
/// "Not found" is not an error: reads return `Ok(None)` and deletes return
/// `Ok(false)`. The fatal variants ([`StoreError::is_fatal`]) mean storage is
/// broken or the caller has a bug; the rest are ordinary outcomes to report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("{entity_type} {id} already exists")]
    AlreadyExists { entity_type: EntityType, id: String },

    #[error("invalid {entity_type} id format: {id}")]
    InvalidIdFormat { entity_type: EntityType, id: String },

    #[error("validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("{entity_type} has no {kind} collection")]
    UnsupportedSubItem {
        entity_type: EntityType,
        kind: SubItemKind,
    },

    #[error(transparent)]
    Supersession(#[from] SupersessionError),

    /// A persisted document exists but cannot be read back.
    #[error("corrupt {entity_type} document {id}: {message}")]
    Parse {
        entity_type: EntityType,
        id: String,
        message: String,
    },

    #[error(transparent)]
    UnknownEntityType(#[from] UnknownEntityType),

    #[error(transparent)]
    Persistence(PersistenceError),
}

impl StoreError {
    /// Corrupt storage, storage failures and programmer errors.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. } | Self::UnknownEntityType(_) | Self::Persistence(_)
        )
    }

    pub(crate) fn invalid_id(entity_type: EntityType, id: &str) -> Self {
        Self::InvalidIdFormat {
            entity_type,
            id: id.to_string(),
        }
    }
}

impl From<PersistenceError> for StoreError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Corrupt {
                entity_type,
                id,
                source,
            } => Self::Parse {
                entity_type,
                id,
                message: source.to_string(),
            },
            other => Self::Persistence(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
