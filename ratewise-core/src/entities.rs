//! Votes, rateable references and the read models built from them.

use crate::{Dimension, EntityId, Score, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Something that can receive votes.
pub trait Rateable {
    /// Identifier of the rateable record.
    fn rateable_id(&self) -> EntityId;

    /// Name of the registered rateable type (e.g. `"Car"`).
    fn rateable_type(&self) -> &str;

    /// Polymorphic reference to this rateable.
    fn rateable_ref(&self) -> RateableRef {
        RateableRef::new(self.rateable_type(), self.rateable_id())
    }
}

/// Something that casts votes.
pub trait Rater {
    fn rater_id(&self) -> EntityId;
}

/// Identity collaborator: resolves "who is looking" for display purposes.
///
/// Vote admission never consults this; it always receives an explicit rater.
pub trait CurrentRater {
    fn current_rater(&self) -> Option<EntityId>;
}

impl Rater for Uuid {
    fn rater_id(&self) -> EntityId {
        *self
    }
}

impl CurrentRater for Option<EntityId> {
    fn current_rater(&self) -> Option<EntityId> {
        *self
    }
}

// ============================================================================
// KEYS
// ============================================================================

/// Polymorphic pointer at a rateable record: its type name plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RateableRef {
    pub rateable_type: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub rateable_id: EntityId,
}

impl RateableRef {
    pub fn new(rateable_type: impl Into<String>, rateable_id: EntityId) -> Self {
        Self {
            rateable_type: rateable_type.into(),
            rateable_id,
        }
    }
}

impl Rateable for RateableRef {
    fn rateable_id(&self) -> EntityId {
        self.rateable_id
    }

    fn rateable_type(&self) -> &str {
        &self.rateable_type
    }

    fn rateable_ref(&self) -> RateableRef {
        self.clone()
    }
}

impl fmt::Display for RateableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.rateable_type, self.rateable_id)
    }
}

/// Uniqueness key for votes: at most one vote exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoteKey {
    pub rateable: RateableRef,
    pub rater_id: EntityId,
    pub dimension: Dimension,
}

impl VoteKey {
    pub fn new(rateable: RateableRef, rater_id: EntityId, dimension: Dimension) -> Self {
        Self {
            rateable,
            rater_id,
            dimension,
        }
    }

    /// The (rateable, dimension) pair this key contributes to.
    pub fn aggregate_key(&self) -> AggregateKey {
        AggregateKey::new(self.rateable.clone(), self.dimension.clone())
    }
}

impl fmt::Display for VoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.rateable, self.dimension, self.rater_id)
    }
}

/// A (rateable, dimension) pair; the unit an average is computed over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub rateable: RateableRef,
    pub dimension: Dimension,
}

impl AggregateKey {
    pub fn new(rateable: RateableRef, dimension: Dimension) -> Self {
        Self {
            rateable,
            dimension,
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rateable, self.dimension)
    }
}

// ============================================================================
// VOTE
// ============================================================================

/// A single star vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Vote {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub vote_id: EntityId,
    pub rateable: RateableRef,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub rater_id: EntityId,
    pub dimension: Dimension,
    pub score: Score,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

impl Vote {
    /// Create a fresh vote for `key`.
    pub fn new(key: &VoteKey, score: Score) -> Self {
        let now = Utc::now();
        Self {
            vote_id: Uuid::now_v7(),
            rateable: key.rateable.clone(),
            rater_id: key.rater_id,
            dimension: key.dimension.clone(),
            score,
            created_at: now,
            updated_at: now,
        }
    }

    /// The uniqueness key of this vote.
    pub fn key(&self) -> VoteKey {
        VoteKey::new(self.rateable.clone(), self.rater_id, self.dimension.clone())
    }

    /// Whether this vote belongs to the given (rateable, dimension) pair.
    pub fn counts_toward(&self, key: &AggregateKey) -> bool {
        self.rateable == key.rateable && self.dimension == key.dimension
    }
}

impl Rateable for Vote {
    fn rateable_id(&self) -> EntityId {
        self.rateable.rateable_id
    }

    fn rateable_type(&self) -> &str {
        &self.rateable.rateable_type
    }
}

impl Rater for Vote {
    fn rater_id(&self) -> EntityId {
        self.rater_id
    }
}

// ============================================================================
// READ MODELS
// ============================================================================

/// Aggregate for a (rateable, dimension) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AggregateResult {
    pub rateable: RateableRef,
    pub dimension: Dimension,
    /// Mean score, `0.0` when there are no votes
    pub average: f64,
    pub total_votes: u64,
    pub score_sum: i64,
    /// Whether `average` was persisted to a cache field
    pub cached: bool,
}

/// How an admitted vote was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum AdmissionOutcome {
    /// First vote for the key
    Created,
    /// Existing vote overwritten
    Updated,
}

/// Result of a successful vote submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Admission {
    pub outcome: AdmissionOutcome,
    pub vote: Vote,
    pub aggregate: AggregateResult,
}

/// What a viewer sees for one (rateable, dimension) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RatingSummary {
    pub rateable: RateableRef,
    pub dimension: Dimension,
    pub average: f64,
    pub total_votes: u64,
    pub max_score: Score,
    /// The viewer's own score, if they are known and have voted
    pub viewer_score: Option<Score>,
    /// Whether the viewer could submit (or change) a vote right now
    pub can_rate: bool,
}
