//! Error types for Ratewise operations

use crate::{Dimension, EntityId, Score};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Record discriminator for storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Vote,
    Rateable,
    CacheField,
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {record:?} {key}")]
    NotFound { record: RecordKind, key: String },

    #[error("Insert failed for {record:?}: {reason}")]
    InsertFailed { record: RecordKind, reason: String },

    #[error("Update failed for {record:?} {key}: {reason}")]
    UpdateFailed {
        record: RecordKind,
        key: String,
        reason: String,
    },

    #[error("Delete failed for {record:?} {key}: {reason}")]
    DeleteFailed {
        record: RecordKind,
        key: String,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Vote admission errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Invalid score {score}: must be between 1 and {max_score}")]
    InvalidScore { score: Score, max_score: Score },

    #[error("{rateable} has already been rated by {rater_id} on dimension {dimension} and updates are disabled")]
    AlreadyRated {
        rateable: String,
        rater_id: EntityId,
        dimension: Dimension,
    },

    #[error("Unknown dimension {dimension} for rateable type {rateable_type}")]
    UnknownDimension {
        rateable_type: String,
        dimension: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Rateable type not registered: {rateable_type}")]
    UnknownRateableType { rateable_type: String },

    #[error("Rateable type already registered: {rateable_type}")]
    DuplicateRateableType { rateable_type: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Coarse error classification exposed to callers of the write API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidScore,
    AlreadyRated,
    UnknownDimension,
    PersistenceFailure,
    Configuration,
}

/// Master error type for all Ratewise errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RatewiseError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl RatewiseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RatewiseError::Storage(_) => ErrorKind::PersistenceFailure,
            RatewiseError::Admission(AdmissionError::InvalidScore { .. }) => ErrorKind::InvalidScore,
            RatewiseError::Admission(AdmissionError::AlreadyRated { .. }) => ErrorKind::AlreadyRated,
            RatewiseError::Admission(AdmissionError::UnknownDimension { .. }) => {
                ErrorKind::UnknownDimension
            }
            RatewiseError::Config(_) => ErrorKind::Configuration,
        }
    }
}

/// Result type alias for Ratewise operations.
pub type RatewiseResult<T> = Result<T, RatewiseError>;

// =============================================================================
// TESTS
// =============================================================================
