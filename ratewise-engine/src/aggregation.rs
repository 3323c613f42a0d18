//! Aggregate computation and cache maintenance.
//!
//! The average for a (rateable, dimension) pair is always `sum / count`
//! over the current vote set, `0.0` when the set is empty. Types that
//! configure a cache column get the value persisted into a named field on
//! the rateable record; cached reads return that field verbatim until the
//! next refresh.
//!
//! Refreshes for one pair are serialized through a striped lock table so the
//! persisted value is always computed from a settled vote set.

use ratewise_core::{
    sanitize_average, AggregateKey, AggregateResult, Dimension, EngineConfig, RateableRef,
    RateableRegistry, RateableType, RatewiseResult,
};
use ratewise_storage::{KeyGuard, KeyLocks, VoteStore};
use std::sync::Arc;

/// Computes averages and keeps cache fields in step with the vote set.
pub struct AggregationEngine {
    store: Arc<dyn VoteStore>,
    registry: Arc<RateableRegistry>,
    locks: KeyLocks,
}

impl AggregationEngine {
    pub fn new(
        store: Arc<dyn VoteStore>,
        registry: Arc<RateableRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            locks: KeyLocks::new("aggregate", config.lock_stripes),
        }
    }

    pub fn registry(&self) -> &RateableRegistry {
        &self.registry
    }

    /// Name of the cache field for `dimension` on `rateable_type`, if it caches.
    pub fn cache_field(
        &self,
        rateable_type: &str,
        dimension: &Dimension,
    ) -> RatewiseResult<Option<String>> {
        Ok(self.registry.get(rateable_type)?.cache_field(dimension))
    }

    /// Recompute the average for the pair and persist it when the type caches.
    pub fn refresh(&self, rateable: &RateableRef, dimension: &Dimension) -> RatewiseResult<f64> {
        Ok(self.refresh_aggregate(rateable, dimension)?.average)
    }

    /// Like [`refresh`](Self::refresh), returning the full aggregate.
    pub fn refresh_aggregate(
        &self,
        rateable: &RateableRef,
        dimension: &Dimension,
    ) -> RatewiseResult<AggregateResult> {
        let rateable_type = self.registry.get(&rateable.rateable_type)?;
        rateable_type.validate_dimension(dimension)?;

        let key = AggregateKey::new(rateable.clone(), dimension.clone());
        let _guard = self.lock_pair(&key);
        self.refresh_locked(&rateable_type, &key)
    }

    /// Hold the refresh lock for a pair.
    ///
    /// Admission takes this around its vote write so that no other refresh
    /// can observe the write before it is either refreshed or rolled back.
    pub(crate) fn lock_pair(&self, key: &AggregateKey) -> KeyGuard<'_> {
        self.locks.lock(key)
    }

    /// Recompute and persist. Caller must hold [`lock_pair`](Self::lock_pair) for `key`.
    pub(crate) fn refresh_locked(
        &self,
        rateable_type: &RateableType,
        key: &AggregateKey,
    ) -> RatewiseResult<AggregateResult> {
        let totals = self.store.vote_totals(key)?;
        let average = totals.average();

        let cached = match rateable_type.cache_field(&key.dimension) {
            Some(field) => {
                self.store.cache_put(&key.rateable, &field, average)?;
                true
            }
            None => false,
        };

        tracing::debug!(
            rateable = %key.rateable,
            dimension = %key.dimension,
            average,
            total_votes = totals.count,
            cached,
            "Refreshed aggregate"
        );

        Ok(AggregateResult {
            rateable: key.rateable.clone(),
            dimension: key.dimension.clone(),
            average,
            total_votes: totals.count,
            score_sum: totals.sum,
            cached,
        })
    }

    /// Current average for the pair.
    ///
    /// With `prefer_cache` and a cache field configured, the stored value is
    /// returned without scanning votes (a field that was never written reads
    /// as `0.0`). Otherwise the average is computed from the votes.
    pub fn current_average(
        &self,
        rateable: &RateableRef,
        dimension: &Dimension,
        prefer_cache: bool,
    ) -> RatewiseResult<f64> {
        if prefer_cache {
            let rateable_type = self.registry.get(&rateable.rateable_type)?;
            if let Some(field) = rateable_type.cache_field(dimension) {
                let stored = self.store.cache_get(rateable, &field)?;
                return Ok(sanitize_average(stored.unwrap_or(0.0)));
            }
        }

        let key = AggregateKey::new(rateable.clone(), dimension.clone());
        Ok(self.store.vote_totals(&key)?.average())
    }

    /// Live aggregate computed from votes; never touches the cache.
    pub fn aggregate(
        &self,
        rateable: &RateableRef,
        dimension: &Dimension,
    ) -> RatewiseResult<AggregateResult> {
        let key = AggregateKey::new(rateable.clone(), dimension.clone());
        let totals = self.store.vote_totals(&key)?;
        Ok(AggregateResult {
            average: totals.average(),
            total_votes: totals.count,
            score_sum: totals.sum,
            cached: false,
            rateable: key.rateable,
            dimension: key.dimension,
        })
    }

    /// Number of votes for the pair.
    pub fn total_votes(&self, rateable: &RateableRef, dimension: &Dimension) -> RatewiseResult<u64> {
        let key = AggregateKey::new(rateable.clone(), dimension.clone());
        Ok(self.store.vote_totals(&key)?.count)
    }

    /// Sum of scores for the pair.
    pub fn score_sum(&self, rateable: &RateableRef, dimension: &Dimension) -> RatewiseResult<i64> {
        let key = AggregateKey::new(rateable.clone(), dimension.clone());
        Ok(self.store.vote_totals(&key)?.sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewise_core::{AdmissionError, RatewiseError, Vote, VoteKey};
    use ratewise_storage::{FailurePoint, MockVoteStore};
    use ratewise_test_utils::{assert_average_eq, car_type, plain_type};
    use uuid::Uuid;

    fn setup() -> (Arc<MockVoteStore>, AggregationEngine) {
        let store = Arc::new(MockVoteStore::new());
        let registry = RateableRegistry::new()
            .with(car_type())
            .and_then(|r| r.with(plain_type()))
            .unwrap();
        let engine = AggregationEngine::new(
            store.clone(),
            Arc::new(registry),
            &EngineConfig::default(),
        );
        (store, engine)
    }

    fn vote(store: &MockVoteStore, rateable: &RateableRef, dimension: &Dimension, score: i32) {
        let key = VoteKey::new(rateable.clone(), Uuid::now_v7(), dimension.clone());
        store.vote_insert(&Vote::new(&key, score)).unwrap();
    }

    #[test]
    fn test_refresh_empty_is_zero() {
        let (store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());

        assert_eq!(engine.refresh(&car, &Dimension::Default).unwrap(), 0.0);
        assert_eq!(store.cache_get(&car, "rating_average").unwrap(), Some(0.0));
    }

    #[test]
    fn test_refresh_persists_per_dimension_field() {
        let (store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());
        let speed = Dimension::named("speed");
        vote(&store, &car, &speed, 8);
        vote(&store, &car, &speed, 6);

        let aggregate = engine.refresh_aggregate(&car, &speed).unwrap();

        assert_average_eq(aggregate.average, 7.0);
        assert_eq!(aggregate.total_votes, 2);
        assert_eq!(aggregate.score_sum, 14);
        assert!(aggregate.cached);
        assert_eq!(store.cache_get(&car, "rating_average_speed").unwrap(), Some(7.0));
        assert_eq!(store.cache_get(&car, "rating_average").unwrap(), None);
    }

    #[test]
    fn test_refresh_without_cache_column() {
        let (store, engine) = setup();
        let article = RateableRef::new("Article", Uuid::now_v7());
        vote(&store, &article, &Dimension::Default, 4);

        let aggregate = engine.refresh_aggregate(&article, &Dimension::Default).unwrap();
        assert!(!aggregate.cached);
        assert_average_eq(aggregate.average, 4.0);
        assert_eq!(engine.cache_field("Article", &Dimension::Default).unwrap(), None);
    }

    #[test]
    fn test_refresh_rejects_undeclared_dimension() {
        let (_store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());
        let result = engine.refresh(&car, &Dimension::named("color"));
        assert!(matches!(
            result,
            Err(RatewiseError::Admission(AdmissionError::UnknownDimension { .. }))
        ));
    }

    #[test]
    fn test_cached_read_trusts_stored_value() {
        let (store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());
        vote(&store, &car, &Dimension::Default, 9);
        engine.refresh(&car, &Dimension::Default).unwrap();

        // A vote written behind the engine's back is not visible to cached reads.
        vote(&store, &car, &Dimension::Default, 1);
        let scans = store.vote_scan_count();

        assert_average_eq(engine.current_average(&car, &Dimension::Default, true).unwrap(), 9.0);
        assert_eq!(store.vote_scan_count(), scans);
        assert_average_eq(engine.current_average(&car, &Dimension::Default, false).unwrap(), 5.0);
    }

    #[test]
    fn test_cached_read_never_written_is_zero() {
        let (_store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());
        assert_eq!(engine.current_average(&car, &Dimension::named("speed"), true).unwrap(), 0.0);
    }

    #[test]
    fn test_cached_nan_is_guarded() {
        let (store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());
        store.cache_put(&car, "rating_average", f64::NAN).unwrap();
        assert_eq!(engine.current_average(&car, &Dimension::Default, true).unwrap(), 0.0);
    }

    #[test]
    fn test_refresh_cache_failure_propagates() {
        let (store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());
        vote(&store, &car, &Dimension::Default, 3);
        store.fail_next(FailurePoint::CacheWrite);

        assert!(matches!(
            engine.refresh(&car, &Dimension::Default),
            Err(RatewiseError::Storage(_))
        ));
        assert_eq!(store.cache_get(&car, "rating_average").unwrap(), None);
    }

    #[test]
    fn test_totals_helpers() {
        let (store, engine) = setup();
        let car = RateableRef::new("Car", Uuid::now_v7());
        vote(&store, &car, &Dimension::Default, 2);
        vote(&store, &car, &Dimension::Default, 7);

        assert_eq!(engine.total_votes(&car, &Dimension::Default).unwrap(), 2);
        assert_eq!(engine.score_sum(&car, &Dimension::Default).unwrap(), 9);
        let live = engine.aggregate(&car, &Dimension::Default).unwrap();
        assert!(!live.cached);
        assert_average_eq(live.average, 4.5);
    }
}
