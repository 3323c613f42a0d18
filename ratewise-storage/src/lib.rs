//! Ratewise Storage - Vote Store Trait and Mock Implementation
//!
//! Defines the persistence abstraction the rating engine runs against:
//! vote records keyed by [`VoteKey`], rateable records, and named cache
//! fields living on those records. The store holds no policy; admission
//! rules are enforced by `ratewise-engine`.

pub mod lock;

pub use lock::{KeyGuard, KeyLocks};

use ratewise_core::{
    mean_or_zero, AggregateKey, Dimension, EntityId, RateableRef, RatewiseError, RatewiseResult,
    RecordKind, Score, StorageError, Timestamp, Vote, VoteKey,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Update payload for votes.
#[derive(Debug, Clone, Default)]
pub struct VoteUpdate {
    /// New score
    pub score: Option<Score>,
    /// Explicit timestamp; defaults to now when `None`
    pub updated_at: Option<Timestamp>,
}

/// Count and sum of the scores for one (rateable, dimension) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteTotals {
    pub count: u64,
    pub sum: i64,
}

impl VoteTotals {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        votes.into_iter().fold(Self::default(), |acc, v| Self {
            count: acc.count + 1,
            sum: acc.sum + v.score as i64,
        })
    }

    /// Mean score, `0.0` for an empty set.
    pub fn average(&self) -> f64 {
        mean_or_zero(self.sum, self.count)
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Persistence collaborator for the rating engine.
///
/// Implementations need not enforce vote-key uniqueness beyond rejecting a
/// duplicate `vote_insert`; the engine serializes admissions per key.
/// Once a vote exists for a rateable, that rateable must be visible to
/// `rateable_list`.
pub trait VoteStore: Send + Sync {
    // === Vote Operations ===

    /// Get the vote for a key, if any.
    fn vote_get(&self, key: &VoteKey) -> RatewiseResult<Option<Vote>>;

    /// Insert a new vote. Fails if a vote already exists for its key.
    fn vote_insert(&self, vote: &Vote) -> RatewiseResult<()>;

    /// Update a vote in place, returning the stored result.
    fn vote_update(&self, key: &VoteKey, update: VoteUpdate) -> RatewiseResult<Vote>;

    /// Delete a vote, returning it if it existed.
    fn vote_delete(&self, key: &VoteKey) -> RatewiseResult<Option<Vote>>;

    /// All votes for a (rateable, dimension) pair.
    fn vote_list_by_aggregate(&self, key: &AggregateKey) -> RatewiseResult<Vec<Vote>>;

    /// All votes cast by a rater, across types and dimensions.
    fn vote_list_by_rater(&self, rater_id: EntityId) -> RatewiseResult<Vec<Vote>>;

    /// All votes on rateables of a type within one dimension.
    fn vote_list_by_type(
        &self,
        rateable_type: &str,
        dimension: &Dimension,
    ) -> RatewiseResult<Vec<Vote>>;

    /// Count and sum for a pair. Override when the backend can aggregate natively.
    fn vote_totals(&self, key: &AggregateKey) -> RatewiseResult<VoteTotals> {
        let votes = self.vote_list_by_aggregate(key)?;
        Ok(VoteTotals::from_votes(&votes))
    }

    // === Rateable Operations ===

    /// Make sure a rateable record exists.
    fn rateable_ensure(&self, rateable: &RateableRef) -> RatewiseResult<()>;

    /// Whether a rateable record exists.
    fn rateable_exists(&self, rateable: &RateableRef) -> RatewiseResult<bool>;

    /// Ids of all rateable records of a type, ascending.
    fn rateable_list(&self, rateable_type: &str) -> RatewiseResult<Vec<EntityId>>;

    /// Delete a rateable record, cascading to its votes and cache fields.
    /// Returns the number of votes removed; `NotFound` if there is no record.
    fn rateable_delete(&self, rateable: &RateableRef) -> RatewiseResult<u64>;

    /// Remove the rateable record if it holds no votes and no cache fields.
    /// Returns whether it was removed.
    fn rateable_prune(&self, rateable: &RateableRef) -> RatewiseResult<bool>;

    // === Cache Field Operations ===

    /// Read a cache field. `None` if the record or field was never written.
    fn cache_get(&self, rateable: &RateableRef, field: &str) -> RatewiseResult<Option<f64>>;

    /// Write a cache field, creating the rateable record if needed.
    fn cache_put(&self, rateable: &RateableRef, field: &str, value: f64) -> RatewiseResult<()>;
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// Write paths where [`MockVoteStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    VoteInsert,
    VoteUpdate,
    VoteDelete,
    CacheWrite,
}

#[derive(Debug, Default)]
struct RateableRecord {
    cache: HashMap<String, f64>,
}

/// In-memory vote store for tests and embedding.
#[derive(Debug, Default)]
pub struct MockVoteStore {
    votes: Arc<RwLock<HashMap<VoteKey, Vote>>>,
    rateables: Arc<RwLock<BTreeMap<RateableRef, RateableRecord>>>,
    failures: Arc<Mutex<HashSet<FailurePoint>>>,
    vote_scans: AtomicU64,
}

fn read<T>(lock: &RwLock<T>) -> RatewiseResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| RatewiseError::Storage(StorageError::LockPoisoned))
}

fn write<T>(lock: &RwLock<T>) -> RatewiseResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| RatewiseError::Storage(StorageError::LockPoisoned))
}

impl MockVoteStore {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write at `point` fail once.
    pub fn fail_next(&self, point: FailurePoint) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(point);
        }
    }

    /// Consume a pending failure for `point`.
    fn take_failure(&self, point: FailurePoint) -> bool {
        self.failures
            .lock()
            .map(|mut failures| failures.remove(&point))
            .unwrap_or(false)
    }

    /// Clear all stored data.
    pub fn clear(&self) -> RatewiseResult<()> {
        write(&self.votes)?.clear();
        write(&self.rateables)?.clear();
        self.vote_scans.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Get count of stored votes.
    pub fn vote_count(&self) -> usize {
        self.votes.read().map(|v| v.len()).unwrap_or(0)
    }

    /// Get count of rateable records.
    pub fn rateable_count(&self) -> usize {
        self.rateables.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of vote-set scans served so far.
    pub fn vote_scan_count(&self) -> u64 {
        self.vote_scans.load(Ordering::SeqCst)
    }

    fn record_scan(&self) {
        self.vote_scans.fetch_add(1, Ordering::SeqCst);
    }
}

impl VoteStore for MockVoteStore {
    // === Vote Operations ===

    fn vote_get(&self, key: &VoteKey) -> RatewiseResult<Option<Vote>> {
        let votes = read(&self.votes)?;
        Ok(votes.get(key).cloned())
    }

    fn vote_insert(&self, vote: &Vote) -> RatewiseResult<()> {
        if self.take_failure(FailurePoint::VoteInsert) {
            return Err(RatewiseError::Storage(StorageError::InsertFailed {
                record: RecordKind::Vote,
                reason: "injected failure".to_string(),
            }));
        }

        let key = vote.key();
        let mut votes = write(&self.votes)?;
        if votes.contains_key(&key) {
            return Err(RatewiseError::Storage(StorageError::InsertFailed {
                record: RecordKind::Vote,
                reason: format!("vote already exists for {}", key),
            }));
        }

        write(&self.rateables)?
            .entry(vote.rateable.clone())
            .or_default();
        votes.insert(key, vote.clone());
        Ok(())
    }

    fn vote_update(&self, key: &VoteKey, update: VoteUpdate) -> RatewiseResult<Vote> {
        if self.take_failure(FailurePoint::VoteUpdate) {
            return Err(RatewiseError::Storage(StorageError::UpdateFailed {
                record: RecordKind::Vote,
                key: key.to_string(),
                reason: "injected failure".to_string(),
            }));
        }

        let mut votes = write(&self.votes)?;
        let vote = votes.get_mut(key).ok_or_else(|| {
            RatewiseError::Storage(StorageError::NotFound {
                record: RecordKind::Vote,
                key: key.to_string(),
            })
        })?;

        if let Some(score) = update.score {
            vote.score = score;
        }
        vote.updated_at = update.updated_at.unwrap_or_else(chrono::Utc::now);

        Ok(vote.clone())
    }

    fn vote_delete(&self, key: &VoteKey) -> RatewiseResult<Option<Vote>> {
        if self.take_failure(FailurePoint::VoteDelete) {
            return Err(RatewiseError::Storage(StorageError::DeleteFailed {
                record: RecordKind::Vote,
                key: key.to_string(),
                reason: "injected failure".to_string(),
            }));
        }

        let mut votes = write(&self.votes)?;
        Ok(votes.remove(key))
    }

    fn vote_list_by_aggregate(&self, key: &AggregateKey) -> RatewiseResult<Vec<Vote>> {
        self.record_scan();
        let votes = read(&self.votes)?;
        Ok(votes
            .values()
            .filter(|v| v.counts_toward(key))
            .cloned()
            .collect())
    }

    fn vote_list_by_rater(&self, rater_id: EntityId) -> RatewiseResult<Vec<Vote>> {
        self.record_scan();
        let votes = read(&self.votes)?;
        let mut result: Vec<Vote> = votes
            .values()
            .filter(|v| v.rater_id == rater_id)
            .cloned()
            .collect();
        result.sort_by_key(|v| v.key());
        Ok(result)
    }

    fn vote_list_by_type(
        &self,
        rateable_type: &str,
        dimension: &Dimension,
    ) -> RatewiseResult<Vec<Vote>> {
        self.record_scan();
        let votes = read(&self.votes)?;
        let mut result: Vec<Vote> = votes
            .values()
            .filter(|v| v.rateable.rateable_type == rateable_type && &v.dimension == dimension)
            .cloned()
            .collect();
        result.sort_by_key(|v| v.key());
        Ok(result)
    }

    // === Rateable Operations ===

    fn rateable_ensure(&self, rateable: &RateableRef) -> RatewiseResult<()> {
        write(&self.rateables)?.entry(rateable.clone()).or_default();
        Ok(())
    }

    fn rateable_exists(&self, rateable: &RateableRef) -> RatewiseResult<bool> {
        Ok(read(&self.rateables)?.contains_key(rateable))
    }

    fn rateable_list(&self, rateable_type: &str) -> RatewiseResult<Vec<EntityId>> {
        let rateables = read(&self.rateables)?;
        // BTreeMap order is (type, id), so ids come out ascending.
        Ok(rateables
            .keys()
            .filter(|r| r.rateable_type == rateable_type)
            .map(|r| r.rateable_id)
            .collect())
    }

    fn rateable_delete(&self, rateable: &RateableRef) -> RatewiseResult<u64> {
        let mut votes = write(&self.votes)?;
        let mut rateables = write(&self.rateables)?;
        if rateables.remove(rateable).is_none() {
            return Err(RatewiseError::Storage(StorageError::NotFound {
                record: RecordKind::Rateable,
                key: rateable.to_string(),
            }));
        }

        let before = votes.len();
        votes.retain(|_, v| &v.rateable != rateable);
        Ok((before - votes.len()) as u64)
    }

    fn rateable_prune(&self, rateable: &RateableRef) -> RatewiseResult<bool> {
        // Same lock order as vote_insert: votes, then rateables.
        let votes = read(&self.votes)?;
        let mut rateables = write(&self.rateables)?;

        let unused = rateables
            .get(rateable)
            .is_some_and(|record| record.cache.is_empty())
            && !votes.values().any(|v| &v.rateable == rateable);
        if unused {
            rateables.remove(rateable);
        }
        Ok(unused)
    }

    // === Cache Field Operations ===

    fn cache_get(&self, rateable: &RateableRef, field: &str) -> RatewiseResult<Option<f64>> {
        let rateables = read(&self.rateables)?;
        Ok(rateables
            .get(rateable)
            .and_then(|record| record.cache.get(field).copied()))
    }

    fn cache_put(&self, rateable: &RateableRef, field: &str, value: f64) -> RatewiseResult<()> {
        if self.take_failure(FailurePoint::CacheWrite) {
            return Err(RatewiseError::Storage(StorageError::UpdateFailed {
                record: RecordKind::CacheField,
                key: format!("{}.{}", rateable, field),
                reason: "injected failure".to_string(),
            }));
        }

        write(&self.rateables)?
            .entry(rateable.clone())
            .or_default()
            .cache
            .insert(field.to_string(), value);
        Ok(())
    }
}
