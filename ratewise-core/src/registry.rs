//! Per-type rating policy.
//!
//! Every rateable type is registered once at startup with its maximum
//! score, re-vote policy, declared dimensions and optional cache column.
//! The admission path only ever reads these entries.

use crate::{
    AdmissionError, ConfigError, Dimension, RatewiseError, RatewiseResult, Score,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Maximum score when a type does not configure one.
pub const DEFAULT_MAX_SCORE: Score = 5;

/// Conventional name of the cache column holding the default-dimension average.
pub const DEFAULT_CACHE_COLUMN: &str = "rating_average";

/// Configuration of one rateable type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateableType {
    name: String,
    max_score: Score,
    allow_update: bool,
    cache_column: Option<String>,
    dimensions: BTreeSet<String>,
}

impl RateableType {
    /// New type with default policy: max score 5, re-votes update, no
    /// caching, only the default dimension.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_score: DEFAULT_MAX_SCORE,
            allow_update: true,
            cache_column: None,
            dimensions: BTreeSet::new(),
        }
    }

    pub fn with_max_score(mut self, max_score: Score) -> Self {
        self.max_score = max_score;
        self
    }

    pub fn with_allow_update(mut self, allow_update: bool) -> Self {
        self.allow_update = allow_update;
        self
    }

    pub fn with_cache_column(mut self, column: impl Into<String>) -> Self {
        self.cache_column = Some(column.into());
        self
    }

    pub fn with_default_cache_column(self) -> Self {
        self.with_cache_column(DEFAULT_CACHE_COLUMN)
    }

    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions = dimensions
            .into_iter()
            .map(|name| Into::<String>::into(name).trim().to_string())
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_score(&self) -> Score {
        self.max_score
    }

    pub fn allow_update(&self) -> bool {
        self.allow_update
    }

    pub fn cache_column(&self) -> Option<&str> {
        self.cache_column.as_deref()
    }

    /// Declared named dimensions, in sorted order.
    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(String::as_str)
    }

    /// Whether `dimension` is an axis of this type.
    /// The default axis always is.
    pub fn declares(&self, dimension: &Dimension) -> bool {
        match dimension {
            Dimension::Default => true,
            Dimension::Named(name) => self.dimensions.contains(name),
        }
    }

    /// Name of the field caching the average for `dimension`, if this type caches.
    ///
    /// The default dimension uses the column as-is; a named dimension
    /// appends `_<snake_cased name>` (`rating_average_speed`).
    pub fn cache_field(&self, dimension: &Dimension) -> Option<String> {
        let column = self.cache_column.as_deref()?;
        Some(match dimension.column_suffix() {
            Some(suffix) => format!("{}_{}", column, suffix),
            None => column.to_string(),
        })
    }

    /// Check that `score` lies in `[1, max_score]`.
    pub fn validate_score(&self, score: Score) -> Result<(), AdmissionError> {
        if score < 1 || score > self.max_score {
            return Err(AdmissionError::InvalidScore {
                score,
                max_score: self.max_score,
            });
        }
        Ok(())
    }

    /// Check that `dimension` is declared for this type.
    pub fn validate_dimension(&self, dimension: &Dimension) -> Result<(), AdmissionError> {
        if !self.declares(dimension) {
            return Err(AdmissionError::UnknownDimension {
                rateable_type: self.name.clone(),
                dimension: dimension.to_string(),
            });
        }
        Ok(())
    }

    /// Validate the configuration itself.
    pub fn validate(&self) -> RatewiseResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name", &self.name, "rateable type name must not be blank"));
        }

        if self.max_score < 1 {
            return Err(invalid(
                "max_score",
                &self.max_score.to_string(),
                "max_score must be at least 1",
            ));
        }

        if let Some(column) = &self.cache_column {
            if column.trim().is_empty() {
                return Err(invalid("cache_column", column, "cache_column must not be blank"));
            }
        }

        // Names that collapse to the same column suffix would share a cache field.
        let mut suffixes = BTreeSet::new();
        for name in &self.dimensions {
            let dimension = Dimension::named(name.as_str());
            let Some(suffix) = dimension.column_suffix() else {
                return Err(invalid("dimensions", name, "dimension names must not be blank"));
            };
            if !suffixes.insert(suffix) {
                return Err(invalid(
                    "dimensions",
                    name,
                    "dimension names must be distinct after normalization",
                ));
            }
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> RatewiseError {
    RatewiseError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// ============================================================================
// REGISTRY
// ============================================================================

/// All registered rateable types, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct RateableRegistry {
    types: HashMap<String, Arc<RateableType>>,
}

impl RateableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new type. Fails if the name is taken or the config is invalid.
    pub fn register(&mut self, rateable_type: RateableType) -> RatewiseResult<()> {
        rateable_type.validate()?;
        if self.types.contains_key(rateable_type.name()) {
            return Err(RatewiseError::Config(ConfigError::DuplicateRateableType {
                rateable_type: rateable_type.name().to_string(),
            }));
        }

        tracing::info!(
            rateable_type = rateable_type.name(),
            max_score = rateable_type.max_score(),
            allow_update = rateable_type.allow_update(),
            cache_column = rateable_type.cache_column(),
            "Registered rateable type"
        );
        self.types
            .insert(rateable_type.name().to_string(), Arc::new(rateable_type));
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, rateable_type: RateableType) -> RatewiseResult<Self> {
        self.register(rateable_type)?;
        Ok(self)
    }

    /// Insert or overwrite a type, returning the previous entry.
    pub fn replace(&mut self, rateable_type: RateableType) -> RatewiseResult<Option<Arc<RateableType>>> {
        rateable_type.validate()?;
        Ok(self
            .types
            .insert(rateable_type.name().to_string(), Arc::new(rateable_type)))
    }

    /// Look up a type, failing with `UnknownRateableType`.
    pub fn get(&self, rateable_type: &str) -> RatewiseResult<Arc<RateableType>> {
        self.types.get(rateable_type).cloned().ok_or_else(|| {
            RatewiseError::Config(ConfigError::UnknownRateableType {
                rateable_type: rateable_type.to_string(),
            })
        })
    }

    pub fn contains(&self, rateable_type: &str) -> bool {
        self.types.contains_key(rateable_type)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
