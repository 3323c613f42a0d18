//! Vote admission.
//!
//! `submit_vote` is the only write path. For a vote key
//! (rateable, rater, dimension) it:
//!
//! 1. rejects scores outside `[1, max_score]` and undeclared dimensions,
//! 2. looks up the existing vote under the key lock,
//! 3. creates, updates, or rejects with `AlreadyRated` per the type policy,
//! 4. refreshes the aggregate under the pair lock, rolling the vote back if
//!    the refresh fails.
//!
//! A rollback removes a rateable record that the failed insert created. If
//! the rollback itself fails the vote stays committed and the aggregate is
//! recomputed from the votes, so the cache never disagrees with them.
//!
//! Lock order is always key lock, then pair lock.

use crate::AggregationEngine;
use ratewise_core::{
    Admission, AdmissionError, AdmissionOutcome, Dimension, EngineConfig, Rateable,
    RateableRegistry, RateableType, Rater, RatewiseError, RatewiseResult, Score, Vote, VoteKey,
};
use ratewise_storage::{KeyLocks, VoteStore, VoteUpdate};
use std::sync::Arc;

/// Decides whether submitted votes are created, updated, or rejected.
pub struct AdmissionController {
    store: Arc<dyn VoteStore>,
    registry: Arc<RateableRegistry>,
    aggregation: Arc<AggregationEngine>,
    locks: KeyLocks,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn VoteStore>,
        registry: Arc<RateableRegistry>,
        aggregation: Arc<AggregationEngine>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            aggregation,
            locks: KeyLocks::new("vote", config.lock_stripes),
        }
    }

    /// Submit a vote from `rater` on `rateable`.
    pub fn submit_vote<R, U>(
        &self,
        rateable: &R,
        rater: &U,
        dimension: &Dimension,
        score: Score,
    ) -> RatewiseResult<Admission>
    where
        R: Rateable + ?Sized,
        U: Rater + ?Sized,
    {
        let key = VoteKey::new(rateable.rateable_ref(), rater.rater_id(), dimension.clone());
        self.submit(&key, score)
    }

    /// Submit a vote for an explicit key.
    pub fn submit(&self, key: &VoteKey, score: Score) -> RatewiseResult<Admission> {
        let rateable_type = self.registry.get(&key.rateable.rateable_type)?;

        if let Err(err) = rateable_type
            .validate_score(score)
            .and_then(|_| rateable_type.validate_dimension(&key.dimension))
        {
            tracing::warn!(key = %key, score, error = %err, "Rejected vote");
            return Err(err.into());
        }

        let _key_guard = self.locks.lock(key);

        let existing = self.store.vote_get(key)?;
        if existing.is_some() && !rateable_type.allow_update() {
            tracing::warn!(key = %key, "Rejected re-vote, updates disabled");
            return Err(RatewiseError::Admission(AdmissionError::AlreadyRated {
                rateable: key.rateable.to_string(),
                rater_id: key.rater_id,
                dimension: key.dimension.clone(),
            }));
        }

        let aggregate_key = key.aggregate_key();
        let _pair_guard = self.aggregation.lock_pair(&aggregate_key);

        let had_record = existing.is_some() || self.store.rateable_exists(&key.rateable)?;
        let (outcome, vote) = match &existing {
            None => {
                let vote = Vote::new(key, score);
                self.store.vote_insert(&vote)?;
                (AdmissionOutcome::Created, vote)
            }
            Some(_) => {
                let vote = self.store.vote_update(
                    key,
                    VoteUpdate {
                        score: Some(score),
                        updated_at: None,
                    },
                )?;
                (AdmissionOutcome::Updated, vote)
            }
        };

        let aggregate = match self.aggregation.refresh_locked(&rateable_type, &aggregate_key) {
            Ok(aggregate) => aggregate,
            Err(err) => {
                self.roll_back(&rateable_type, key, existing.as_ref(), had_record);
                return Err(err);
            }
        };

        tracing::debug!(
            key = %key,
            score,
            outcome = ?outcome,
            average = aggregate.average,
            "Admitted vote"
        );

        Ok(Admission {
            outcome,
            vote,
            aggregate,
        })
    }

    /// Restore the vote for `key` to `previous` after a failed refresh.
    /// Caller must hold both the key lock and the pair lock.
    fn roll_back(
        &self,
        rateable_type: &RateableType,
        key: &VoteKey,
        previous: Option<&Vote>,
        had_record: bool,
    ) {
        let result = match previous {
            None => self.store.vote_delete(key).and_then(|_| {
                if had_record {
                    Ok(())
                } else {
                    self.store.rateable_prune(&key.rateable).map(|_| ())
                }
            }),
            Some(prev) => self
                .store
                .vote_update(
                    key,
                    VoteUpdate {
                        score: Some(prev.score),
                        updated_at: Some(prev.updated_at),
                    },
                )
                .map(|_| ()),
        };

        let err = match result {
            Ok(()) => {
                tracing::warn!(key = %key, "Rolled back vote after failed refresh");
                return;
            }
            Err(err) => err,
        };
        tracing::error!(key = %key, error = %err, "Failed to roll back vote after failed refresh");

        match self.aggregation.refresh_locked(rateable_type, &key.aggregate_key()) {
            Ok(aggregate) => tracing::warn!(
                key = %key,
                average = aggregate.average,
                "Resynced aggregate with the committed vote"
            ),
            Err(err) => {
                tracing::error!(key = %key, error = %err, "Aggregate left stale after failed rollback")
            }
        }
    }

    /// The vote `rater` cast on `rateable` in `dimension`, if any.
    pub fn existing_vote<R, U>(
        &self,
        rateable: &R,
        rater: &U,
        dimension: &Dimension,
    ) -> RatewiseResult<Option<Vote>>
    where
        R: Rateable + ?Sized,
        U: Rater + ?Sized,
    {
        let key = VoteKey::new(rateable.rateable_ref(), rater.rater_id(), dimension.clone());
        self.store.vote_get(&key)
    }

    /// Whether `rater` has voted on `rateable` in `dimension`.
    pub fn has_rated<R, U>(&self, rateable: &R, rater: &U, dimension: &Dimension) -> RatewiseResult<bool>
    where
        R: Rateable + ?Sized,
        U: Rater + ?Sized,
    {
        Ok(self.existing_vote(rateable, rater, dimension)?.is_some())
    }

    /// Whether a submission from `rater` would be admitted policy-wise:
    /// the dimension is declared, and there is no prior vote or the type
    /// allows updates.
    pub fn can_rate<R, U>(&self, rateable: &R, rater: &U, dimension: &Dimension) -> RatewiseResult<bool>
    where
        R: Rateable + ?Sized,
        U: Rater + ?Sized,
    {
        let rateable_type = self.registry.get(rateable.rateable_type())?;
        if !rateable_type.declares(dimension) {
            return Ok(false);
        }
        if rateable_type.allow_update() {
            return Ok(true);
        }
        Ok(!self.has_rated(rateable, rater, dimension)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryIndex;
    use ratewise_core::{AggregateKey, ErrorKind, RateableRef};
    use ratewise_storage::{FailurePoint, MockVoteStore};
    use ratewise_test_utils::{assert_average_eq, car_type, plain_type};
    use uuid::Uuid;

    struct Harness {
        store: Arc<MockVoteStore>,
        aggregation: Arc<AggregationEngine>,
        admission: AdmissionController,
        queries: QueryIndex,
    }

    fn harness_with(registry: RateableRegistry) -> Harness {
        let store = Arc::new(MockVoteStore::new());
        let registry = Arc::new(registry);
        let config = EngineConfig::default();
        let aggregation = Arc::new(AggregationEngine::new(store.clone(), registry.clone(), &config));
        let admission =
            AdmissionController::new(store.clone(), registry.clone(), aggregation.clone(), &config);
        let queries = QueryIndex::new(store.clone(), registry, aggregation.clone(), true);
        Harness {
            store,
            aggregation,
            admission,
            queries,
        }
    }

    fn harness() -> Harness {
        harness_with(
            RateableRegistry::new()
                .with(car_type())
                .and_then(|r| r.with(plain_type()))
                .unwrap(),
        )
    }

    fn car() -> RateableRef {
        RateableRef::new("Car", Uuid::now_v7())
    }

    #[test]
    fn test_first_vote_creates() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();

        let admission = h.admission.submit_vote(&car, &rater, &Dimension::Default, 7).unwrap();

        assert_eq!(admission.outcome, AdmissionOutcome::Created);
        assert_eq!(admission.vote.score, 7);
        assert_average_eq(admission.aggregate.average, 7.0);
        assert_eq!(h.store.vote_count(), 1);
        assert_eq!(h.store.cache_get(&car, "rating_average").unwrap(), Some(7.0));
    }

    #[test]
    fn test_revote_updates_in_place() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();

        let first = h.admission.submit_vote(&car, &rater, &Dimension::Default, 7).unwrap();
        let second = h.admission.submit_vote(&car, &rater, &Dimension::Default, 1).unwrap();

        assert_eq!(second.outcome, AdmissionOutcome::Updated);
        assert_eq!(second.vote.vote_id, first.vote.vote_id);
        assert_eq!(second.vote.created_at, first.vote.created_at);
        assert!(second.vote.updated_at >= first.vote.updated_at);
        assert_eq!(h.store.vote_count(), 1);
        assert_average_eq(second.aggregate.average, 1.0);
    }

    #[test]
    fn test_revote_rejected_when_updates_disabled() {
        let h = harness_with(
            RateableRegistry::new()
                .with(car_type().with_allow_update(false))
                .unwrap(),
        );
        let car = car();
        let rater = Uuid::now_v7();

        h.admission.submit_vote(&car, &rater, &Dimension::Default, 4).unwrap();
        let err = h
            .admission
            .submit_vote(&car, &rater, &Dimension::Default, 9)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AlreadyRated);
        let stored = h.admission.existing_vote(&car, &rater, &Dimension::Default).unwrap().unwrap();
        assert_eq!(stored.score, 4);
        assert!(!h.admission.can_rate(&car, &rater, &Dimension::Default).unwrap());
        // A different dimension is a different key.
        assert!(h.admission.can_rate(&car, &rater, &Dimension::named("speed")).unwrap());
    }

    #[test]
    fn test_score_boundaries() {
        let h = harness();
        let car = car();

        assert!(h.admission.submit_vote(&car, &Uuid::now_v7(), &Dimension::Default, 10).is_ok());

        let err = h
            .admission
            .submit_vote(&car, &Uuid::now_v7(), &Dimension::Default, 11)
            .unwrap_err();
        assert_eq!(
            err,
            RatewiseError::Admission(AdmissionError::InvalidScore {
                score: 11,
                max_score: 10
            })
        );

        let err = h
            .admission
            .submit_vote(&car, &Uuid::now_v7(), &Dimension::Default, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidScore);
        assert_eq!(h.store.vote_count(), 1);
    }

    #[test]
    fn test_unknown_dimension_and_type() {
        let h = harness();
        let err = h
            .admission
            .submit_vote(&car(), &Uuid::now_v7(), &Dimension::named("color"), 3)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownDimension);

        let boat = RateableRef::new("Boat", Uuid::now_v7());
        let err = h
            .admission
            .submit_vote(&boat, &Uuid::now_v7(), &Dimension::Default, 3)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(h.store.vote_count(), 0);
    }

    #[test]
    fn test_insert_failure_skips_refresh() {
        let h = harness();
        let car = car();
        h.store.fail_next(FailurePoint::VoteInsert);

        let err = h
            .admission
            .submit_vote(&car, &Uuid::now_v7(), &Dimension::Default, 5)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(h.store.vote_count(), 0);
        assert_eq!(h.store.cache_get(&car, "rating_average").unwrap(), None);
    }

    #[test]
    fn test_cache_failure_rolls_back_created_vote() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();
        h.store.fail_next(FailurePoint::CacheWrite);

        let err = h
            .admission
            .submit_vote(&car, &rater, &Dimension::Default, 5)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(h.store.vote_count(), 0);
        assert!(!h.admission.has_rated(&car, &rater, &Dimension::Default).unwrap());
    }

    #[test]
    fn test_cache_failure_leaves_no_new_record() {
        let h = harness();
        let mut ids = [Uuid::now_v7(), Uuid::now_v7()];
        ids.sort();
        let rated = RateableRef::new("Car", ids[1]);
        h.admission.submit_vote(&rated, &Uuid::now_v7(), &Dimension::Default, 4).unwrap();

        h.store.fail_next(FailurePoint::CacheWrite);
        let fresh = RateableRef::new("Car", ids[0]);
        let err = h
            .admission
            .submit_vote(&fresh, &Uuid::now_v7(), &Dimension::Default, 2)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(h.store.vote_count(), 1);
        assert_eq!(h.store.rateable_count(), 1);
        assert_eq!(
            h.queries.least_popular("Car", &Dimension::Default).unwrap(),
            Some(ids[1])
        );
    }

    #[test]
    fn test_cache_failure_keeps_existing_record() {
        let h = harness();
        let car = car();
        h.store.rateable_ensure(&car).unwrap();

        h.store.fail_next(FailurePoint::CacheWrite);
        assert!(h
            .admission
            .submit_vote(&car, &Uuid::now_v7(), &Dimension::Default, 3)
            .is_err());

        assert_eq!(h.store.vote_count(), 0);
        assert!(h.store.rateable_exists(&car).unwrap());
    }

    #[test]
    fn test_failed_rollback_resyncs_cache() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();
        h.admission.submit_vote(&car, &Uuid::now_v7(), &Dimension::Default, 2).unwrap();

        h.store.fail_next(FailurePoint::CacheWrite);
        h.store.fail_next(FailurePoint::VoteDelete);
        let err = h
            .admission
            .submit_vote(&car, &rater, &Dimension::Default, 8)
            .unwrap_err();

        // The vote could not be removed, so it stays and the cache follows it.
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(h.admission.has_rated(&car, &rater, &Dimension::Default).unwrap());
        assert_eq!(h.store.vote_count(), 2);
        assert_eq!(h.store.cache_get(&car, "rating_average").unwrap(), Some(5.0));
        assert_average_eq(
            h.aggregation.current_average(&car, &Dimension::Default, false).unwrap(),
            5.0,
        );
    }

    #[test]
    fn test_update_failure_skips_refresh() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();
        h.admission.submit_vote(&car, &rater, &Dimension::Default, 4).unwrap();
        let scans = h.store.vote_scan_count();

        h.store.fail_next(FailurePoint::VoteUpdate);
        let err = h
            .admission
            .submit_vote(&car, &rater, &Dimension::Default, 9)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(h.store.vote_scan_count(), scans);
        let stored = h.admission.existing_vote(&car, &rater, &Dimension::Default).unwrap().unwrap();
        assert_eq!(stored.score, 4);
        assert_eq!(h.store.cache_get(&car, "rating_average").unwrap(), Some(4.0));
    }

    #[test]
    fn test_cannot_rate_undeclared_dimension() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();

        assert!(!h.admission.can_rate(&car, &rater, &Dimension::named("color")).unwrap());
        assert!(h.admission.can_rate(&car, &rater, &Dimension::named("speed")).unwrap());
        assert!(h
            .admission
            .submit_vote(&car, &rater, &Dimension::named("color"), 3)
            .is_err());
    }

    #[test]
    fn test_cache_failure_restores_updated_vote() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();
        let original = h.admission.submit_vote(&car, &rater, &Dimension::Default, 5).unwrap();

        h.store.fail_next(FailurePoint::CacheWrite);
        assert!(h.admission.submit_vote(&car, &rater, &Dimension::Default, 2).is_err());

        let stored = h.admission.existing_vote(&car, &rater, &Dimension::Default).unwrap().unwrap();
        assert_eq!(stored.score, 5);
        assert_eq!(stored.updated_at, original.vote.updated_at);
        assert_eq!(h.store.cache_get(&car, "rating_average").unwrap(), Some(5.0));
    }

    #[test]
    fn test_dimension_isolation() {
        let h = harness();
        let car = car();
        let rater = Uuid::now_v7();

        h.admission.submit_vote(&car, &rater, &Dimension::named("price"), 2).unwrap();
        h.admission.submit_vote(&car, &rater, &Dimension::named("speed"), 9).unwrap();

        assert_average_eq(
            h.aggregation.current_average(&car, &Dimension::named("speed"), false).unwrap(),
            9.0,
        );
        assert_average_eq(
            h.aggregation.current_average(&car, &Dimension::named("price"), true).unwrap(),
            2.0,
        );
        assert_eq!(
            h.aggregation.current_average(&car, &Dimension::Default, true).unwrap(),
            0.0
        );
        assert_eq!(h.store.vote_count(), 2);
    }

    #[test]
    fn test_uncached_type_admission() {
        let h = harness();
        let article = RateableRef::new("Article", Uuid::now_v7());
        let admission = h
            .admission
            .submit_vote(&article, &Uuid::now_v7(), &Dimension::Default, 5)
            .unwrap();
        assert!(!admission.aggregate.cached);
        let totals = h
            .store
            .vote_totals(&AggregateKey::new(article, Dimension::Default))
            .unwrap();
        assert_eq!(totals.count, 1);
    }
}
