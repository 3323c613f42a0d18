//! Ratewise Test Utilities
//!
//! Shared test infrastructure for the Ratewise workspace:
//! - Rateable type definitions used across crates
//! - Proptest generators for keys, dimensions and scores
//! - A seeded showroom fixture
//! - Assertions for averages and error kinds

// Re-export mock storage from its source crate
pub use ratewise_storage::{FailurePoint, MockVoteStore, VoteStore, VoteTotals};

// Re-export core types for convenience
pub use ratewise_core::{
    AggregateKey, Dimension, EngineConfig, EntityId, ErrorKind, RateableRef, RateableRegistry,
    RateableType, RatewiseError, RatewiseResult, Score, Timestamp, Vote, VoteKey,
};

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub use assertions::{assert_average_eq, assert_error_kind};
pub use fixtures::{car_registry, car_type, plain_type};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Ratewise keys and scores.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// A score inside `[1, max_score]`.
    pub fn arb_score(max_score: Score) -> impl Strategy<Value = Score> {
        1..=max_score.max(1)
    }

    /// Either the default dimension or one of the Car dimensions.
    pub fn arb_dimension() -> impl Strategy<Value = Dimension> {
        prop_oneof![
            Just(Dimension::Default),
            Just(Dimension::named("speed")),
            Just(Dimension::named("reliability")),
            Just(Dimension::named("price")),
        ]
    }

    pub fn arb_rateable_ref(rateable_type: &'static str) -> impl Strategy<Value = RateableRef> {
        arb_uuid().prop_map(move |id| RateableRef::new(rateable_type, id))
    }

    pub fn arb_vote_key(rateable_type: &'static str) -> impl Strategy<Value = VoteKey> {
        (arb_rateable_ref(rateable_type), arb_uuid(), arb_dimension())
            .prop_map(|(rateable, rater, dimension)| VoteKey::new(rateable, rater, dimension))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built rateable types and a seeded store.

    use super::*;

    /// Cars take 1..=10 stars on three named axes plus the default one,
    /// cached under `rating_average*`.
    pub fn car_type() -> RateableType {
        RateableType::new("Car")
            .with_max_score(10)
            .with_default_cache_column()
            .with_dimensions(["speed", "reliability", "price"])
    }

    /// Defaults throughout: 1..=5, updates allowed, no cache.
    pub fn plain_type() -> RateableType {
        RateableType::new("Article")
    }

    pub fn car_registry() -> RateableRegistry {
        let mut registry = RateableRegistry::new();
        for rateable_type in [car_type(), plain_type()] {
            if let Err(err) = registry.register(rateable_type) {
                panic!("fixture types must register: {}", err);
            }
        }
        registry
    }

    /// A vote on `key` stamped with a fixed time.
    pub fn vote_at(key: &VoteKey, score: Score, at: Timestamp) -> Vote {
        let mut vote = Vote::new(key, score);
        vote.created_at = at;
        vote.updated_at = at;
        vote
    }

    /// Two cars, one known user, a store and the registry describing them.
    ///
    /// Seeding goes straight to the store and writes the cache field the
    /// way a refresh would, so engine code under test starts from a
    /// consistent state.
    pub struct Showroom {
        pub store: Arc<MockVoteStore>,
        pub registry: Arc<RateableRegistry>,
        pub audi: RateableRef,
        pub infinity: RateableRef,
        pub denis: EntityId,
    }

    impl Showroom {
        pub fn new() -> Self {
            let mut ids = [Uuid::now_v7(), Uuid::now_v7()];
            ids.sort();
            let store = Arc::new(MockVoteStore::new());
            let showroom = Self {
                store,
                registry: Arc::new(car_registry()),
                audi: RateableRef::new("Car", ids[0]),
                infinity: RateableRef::new("Car", ids[1]),
                denis: Uuid::now_v7(),
            };
            for car in [&showroom.audi, &showroom.infinity] {
                if let Err(err) = showroom.store.rateable_ensure(car) {
                    panic!("seeding {} failed: {}", car, err);
                }
            }
            showroom
        }

        /// Store a vote and bring the matching cache field up to date.
        pub fn seed_vote(
            &self,
            rateable: &RateableRef,
            rater_id: EntityId,
            dimension: &Dimension,
            score: Score,
        ) -> Vote {
            let key = VoteKey::new(rateable.clone(), rater_id, dimension.clone());
            let vote = vote_at(&key, score, Utc::now());
            if let Err(err) = self.store.vote_insert(&vote) {
                panic!("seeding {} failed: {}", key, err);
            }

            let rateable_type = match self.registry.get(&rateable.rateable_type) {
                Ok(t) => t,
                Err(err) => panic!("seeding {} failed: {}", key, err),
            };
            if let Some(field) = rateable_type.cache_field(dimension) {
                let average = self
                    .store
                    .vote_totals(&key.aggregate_key())
                    .map(|totals| totals.average())
                    .unwrap_or(0.0);
                if let Err(err) = self.store.cache_put(rateable, &field, average) {
                    panic!("seeding {} failed: {}", field, err);
                }
            }
            vote
        }
    }

    impl Default for Showroom {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Ratewise-specific checks.

    use super::*;

    const EPSILON: f64 = 1e-9;

    /// Assert two averages are equal up to float noise.
    #[track_caller]
    pub fn assert_average_eq(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "Expected average {}, got {}",
            expected,
            actual
        );
    }

    /// Assert a result failed with the given error kind.
    #[track_caller]
    pub fn assert_error_kind<T: std::fmt::Debug>(result: &RatewiseResult<T>, kind: ErrorKind) {
        match result {
            Err(err) => assert_eq!(err.kind(), kind, "Wrong error kind for {:?}", err),
            other => panic!("Expected {:?} error, got: {:?}", kind, other),
        }
    }

    /// Assert the stored cache field for a pair equals `expected`.
    #[track_caller]
    pub fn assert_cached(store: &dyn VoteStore, rateable: &RateableRef, field: &str, expected: f64) {
        match store.cache_get(rateable, field) {
            Ok(Some(value)) => assert_average_eq(value, expected),
            other => panic!("Expected cached {} = {}, got: {:?}", field, expected, other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_car_type_is_valid() {
        let car = car_type();
        assert!(car.validate().is_ok());
        assert_eq!(car.max_score(), 10);
        assert_eq!(
            car.cache_field(&Dimension::named("speed")).as_deref(),
            Some("rating_average_speed")
        );
    }

    #[test]
    fn test_car_registry_has_both_types() {
        let registry = car_registry();
        assert_eq!(registry.names(), vec!["Article", "Car"]);
    }

    #[test]
    fn test_showroom_seed_keeps_cache_in_step() {
        let showroom = fixtures::Showroom::new();
        let speed = Dimension::named("speed");
        showroom.seed_vote(&showroom.audi, showroom.denis, &speed, 8);
        showroom.seed_vote(&showroom.audi, Uuid::now_v7(), &speed, 6);

        assertions::assert_cached(
            showroom.store.as_ref(),
            &showroom.audi,
            "rating_average_speed",
            7.0,
        );
        assert_eq!(showroom.store.rateable_count(), 2);
        assert!(showroom.audi.rateable_id < showroom.infinity.rateable_id);
    }

    #[test]
    fn test_assert_error_kind() {
        let result: RatewiseResult<()> = Err(RatewiseError::from(
            ratewise_core::AdmissionError::InvalidScore {
                score: 11,
                max_score: 10,
            },
        ));
        assertions::assert_error_kind(&result, ErrorKind::InvalidScore);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_scores_pass_car_policy(score in generators::arb_score(10)) {
            prop_assert!(car_type().validate_score(score).is_ok());
        }

        #[test]
        fn prop_seeded_vote_lands_on_its_aggregate(
            key in generators::arb_vote_key("Car"),
            score in generators::arb_score(10),
        ) {
            let showroom = fixtures::Showroom::new();
            let vote = showroom.seed_vote(&key.rateable, key.rater_id, &key.dimension, score);
            prop_assert_eq!(vote.key(), key.clone());

            let totals = showroom.store.vote_totals(&key.aggregate_key()).unwrap();
            prop_assert_eq!(totals.count, 1);
            prop_assert_eq!(totals.sum, score as i64);
            prop_assert!(showroom.store.rateable_exists(&key.rateable).unwrap());
        }

        #[test]
        fn prop_generated_dimensions_are_declared(dimension in generators::arb_dimension()) {
            prop_assert!(car_type().validate_dimension(&dimension).is_ok());
        }
    }
}
