//! Wiring of the admission, aggregation and query components over one store.

use crate::{AdmissionController, AggregationEngine, QueryIndex};
use ratewise_core::{
    Admission, Dimension, EngineConfig, Rateable, RateableRegistry, RatewiseResult, Rater, Score,
};
use ratewise_storage::VoteStore;
use std::sync::Arc;

/// One handle for hosts that do not want to assemble the parts themselves.
///
/// All three components share the store, the registry and the aggregation
/// engine's lock table, so admissions and explicit refreshes serialize on
/// the same pair locks.
pub struct RatingService {
    config: EngineConfig,
    registry: Arc<RateableRegistry>,
    aggregation: Arc<AggregationEngine>,
    admission: AdmissionController,
    queries: QueryIndex,
}

impl RatingService {
    pub fn new(
        store: Arc<dyn VoteStore>,
        registry: RateableRegistry,
        config: EngineConfig,
    ) -> RatewiseResult<Self> {
        config.validate()?;

        let registry = Arc::new(registry);
        let aggregation = Arc::new(AggregationEngine::new(
            store.clone(),
            registry.clone(),
            &config,
        ));
        let admission =
            AdmissionController::new(store.clone(), registry.clone(), aggregation.clone(), &config);
        let queries = QueryIndex::new(
            store,
            registry.clone(),
            aggregation.clone(),
            config.prefer_cache_reads,
        );

        tracing::info!(
            rateable_types = registry.len(),
            lock_stripes = config.lock_stripes,
            prefer_cache_reads = config.prefer_cache_reads,
            "Rating service ready"
        );

        Ok(Self {
            config,
            registry,
            aggregation,
            admission,
            queries,
        })
    }

    /// Service with [`EngineConfig::default`].
    pub fn with_defaults(
        store: Arc<dyn VoteStore>,
        registry: RateableRegistry,
    ) -> RatewiseResult<Self> {
        Self::new(store, registry, EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RateableRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn aggregation(&self) -> &AggregationEngine {
        &self.aggregation
    }

    pub fn queries(&self) -> &QueryIndex {
        &self.queries
    }

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
        self.admission.submit_vote(rateable, rater, dimension, score)
    }

    pub fn current_average<R: Rateable + ?Sized>(
        &self,
        rateable: &R,
        dimension: &Dimension,
    ) -> RatewiseResult<f64> {
        self.queries.current_average(rateable, dimension)
    }
}
