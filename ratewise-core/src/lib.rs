//! Ratewise Core - Entity Types and Policy
//!
//! Data types shared by every Ratewise crate: identities, dimensions,
//! votes, read models, the error hierarchy, engine configuration and the
//! per-type rating policy registry. No persistence and no locking here.

pub mod config;
pub mod dimension;
pub mod entities;
pub mod error;
pub mod identity;
pub mod registry;

pub use config::EngineConfig;
pub use dimension::Dimension;
pub use entities::{
    Admission, AdmissionOutcome, AggregateKey, AggregateResult, CurrentRater, Rateable,
    RateableRef, Rater, RatingSummary, Vote, VoteKey,
};
pub use error::{
    AdmissionError, ConfigError, ErrorKind, RatewiseError, RatewiseResult, RecordKind,
    StorageError,
};
pub use identity::{mean_or_zero, new_entity_id, sanitize_average, EntityId, Score, Timestamp};
pub use registry::{RateableRegistry, RateableType, DEFAULT_CACHE_COLUMN, DEFAULT_MAX_SCORE};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
