//! Read-side lookups over votes and aggregates.
//!
//! Nothing in here writes; cache fields are only ever read. Empty results
//! are values (`0.0`, empty collections, `None`), never errors.

use crate::AggregationEngine;
use ratewise_core::{
    AggregateKey, CurrentRater, Dimension, EntityId, Rateable, RateableRef, RateableRegistry,
    RatewiseResult, RatingSummary, Score, Vote, VoteKey,
};
use ratewise_storage::VoteStore;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Which end of the average ranking to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rank {
    Highest,
    Lowest,
}

/// Read API consumed by presentation and reporting callers.
pub struct QueryIndex {
    store: Arc<dyn VoteStore>,
    registry: Arc<RateableRegistry>,
    aggregation: Arc<AggregationEngine>,
    prefer_cache: bool,
}

impl QueryIndex {
    pub fn new(
        store: Arc<dyn VoteStore>,
        registry: Arc<RateableRegistry>,
        aggregation: Arc<AggregationEngine>,
        prefer_cache: bool,
    ) -> Self {
        Self {
            store,
            registry,
            aggregation,
            prefer_cache,
        }
    }

    /// Every rateable the rater has voted on, in any dimension.
    pub fn votes_by_rater(&self, rater_id: EntityId) -> RatewiseResult<BTreeSet<RateableRef>> {
        Ok(self
            .store
            .vote_list_by_rater(rater_id)?
            .into_iter()
            .map(|v| v.rateable)
            .collect())
    }

    /// Rateables of a type the rater has voted on in `dimension`, ascending by id.
    pub fn find_rated_by(
        &self,
        rateable_type: &str,
        rater_id: EntityId,
        dimension: &Dimension,
    ) -> RatewiseResult<Vec<EntityId>> {
        self.distinct_rateables(rateable_type, dimension, |v| v.rater_id == rater_id)
    }

    /// Rateables of a type holding at least one raw vote equal to `score`
    /// in `dimension`, ascending by id.
    pub fn entities_with_score(
        &self,
        rateable_type: &str,
        score: Score,
        dimension: &Dimension,
    ) -> RatewiseResult<Vec<EntityId>> {
        self.distinct_rateables(rateable_type, dimension, |v| v.score == score)
    }

    fn distinct_rateables(
        &self,
        rateable_type: &str,
        dimension: &Dimension,
        predicate: impl Fn(&Vote) -> bool,
    ) -> RatewiseResult<Vec<EntityId>> {
        let ids: BTreeSet<EntityId> = self
            .store
            .vote_list_by_type(rateable_type, dimension)?
            .iter()
            .filter(|v| predicate(v))
            .map(|v| v.rateable.rateable_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// The rateable of a type with the highest current average in `dimension`.
    /// Ties go to the lowest id; `None` when the type has no records.
    pub fn most_popular(
        &self,
        rateable_type: &str,
        dimension: &Dimension,
    ) -> RatewiseResult<Option<EntityId>> {
        self.ranked(rateable_type, dimension, Rank::Highest)
    }

    /// The rateable of a type with the lowest current average in `dimension`.
    /// Ties go to the lowest id; `None` when the type has no records.
    pub fn least_popular(
        &self,
        rateable_type: &str,
        dimension: &Dimension,
    ) -> RatewiseResult<Option<EntityId>> {
        self.ranked(rateable_type, dimension, Rank::Lowest)
    }

    fn ranked(
        &self,
        rateable_type: &str,
        dimension: &Dimension,
        rank: Rank,
    ) -> RatewiseResult<Option<EntityId>> {
        let mut ids = self.store.rateable_list(rateable_type)?;
        ids.sort_unstable();

        let mut best: Option<(EntityId, f64)> = None;
        for id in ids {
            let rateable = RateableRef::new(rateable_type, id);
            let average = self
                .aggregation
                .current_average(&rateable, dimension, self.prefer_cache)?;

            // Strict comparison keeps the earlier (lower) id on ties.
            let better = match (best, rank) {
                (None, _) => true,
                (Some((_, current)), Rank::Highest) => average > current,
                (Some((_, current)), Rank::Lowest) => average < current,
            };
            if better {
                best = Some((id, average));
            }
        }

        Ok(best.map(|(id, _)| id))
    }

    /// Distinct raters of a rateable in `dimension`, ascending by id.
    pub fn raters<R: Rateable + ?Sized>(
        &self,
        rateable: &R,
        dimension: &Dimension,
    ) -> RatewiseResult<Vec<EntityId>> {
        let key = AggregateKey::new(rateable.rateable_ref(), dimension.clone());
        let raters: BTreeSet<EntityId> = self
            .store
            .vote_list_by_aggregate(&key)?
            .into_iter()
            .map(|v| v.rater_id)
            .collect();
        Ok(raters.into_iter().collect())
    }

    /// The vote a rater cast on a rateable in `dimension`, if any.
    pub fn existing_vote<R: Rateable + ?Sized>(
        &self,
        rateable: &R,
        rater_id: EntityId,
        dimension: &Dimension,
    ) -> RatewiseResult<Option<Vote>> {
        let key = VoteKey::new(rateable.rateable_ref(), rater_id, dimension.clone());
        self.store.vote_get(&key)
    }

    /// Current average using the configured cache preference.
    pub fn current_average<R: Rateable + ?Sized>(
        &self,
        rateable: &R,
        dimension: &Dimension,
    ) -> RatewiseResult<f64> {
        self.aggregation
            .current_average(&rateable.rateable_ref(), dimension, self.prefer_cache)
    }

    /// Everything a star widget needs for one viewer.
    ///
    /// An unknown viewer gets no score and cannot rate, and nobody can rate
    /// on an undeclared dimension.
    pub fn viewer_summary<R, V>(
        &self,
        rateable: &R,
        dimension: &Dimension,
        viewer: &V,
    ) -> RatewiseResult<RatingSummary>
    where
        R: Rateable + ?Sized,
        V: CurrentRater + ?Sized,
    {
        let rateable = rateable.rateable_ref();
        let rateable_type = self.registry.get(&rateable.rateable_type)?;

        let average = self
            .aggregation
            .current_average(&rateable, dimension, self.prefer_cache)?;
        let total_votes = self.aggregation.total_votes(&rateable, dimension)?;

        let (viewer_score, can_rate) = match viewer.current_rater() {
            Some(rater_id) => {
                let existing = self.existing_vote(&rateable, rater_id, dimension)?;
                let can_rate = rateable_type.declares(dimension)
                    && (existing.is_none() || rateable_type.allow_update());
                (existing.map(|v| v.score), can_rate)
            }
            None => (None, false),
        };

        Ok(RatingSummary {
            rateable,
            dimension: dimension.clone(),
            average,
            total_votes,
            max_score: rateable_type.max_score(),
            viewer_score,
            can_rate,
        })
    }
}
