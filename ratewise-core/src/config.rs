//! Engine configuration

use crate::{ConfigError, RatewiseError, RatewiseResult};
use serde::{Deserialize, Serialize};

/// Runtime settings for the rating engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of mutex stripes in each key lock table.
    /// More stripes means fewer unrelated keys contending on the same lock.
    pub lock_stripes: usize,
    /// Whether read-side queries trust cache fields when the type has one.
    pub prefer_cache_reads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_stripes: 64,
            prefer_cache_reads: true,
        }
    }
}

impl EngineConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `RATEWISE_LOCK_STRIPES`: Lock stripes per table (default: 64)
    /// - `RATEWISE_PREFER_CACHE_READS`: Trust cache fields on reads (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            lock_stripes: std::env::var("RATEWISE_LOCK_STRIPES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lock_stripes),
            prefer_cache_reads: std::env::var("RATEWISE_PREFER_CACHE_READS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.prefer_cache_reads),
        }
    }

    /// Set the number of lock stripes.
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    /// Enable or disable cached reads.
    pub fn with_prefer_cache_reads(mut self, enabled: bool) -> Self {
        self.prefer_cache_reads = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RatewiseResult<()> {
        if self.lock_stripes == 0 {
            return Err(RatewiseError::Config(ConfigError::InvalidValue {
                field: "lock_stripes".to_string(),
                value: self.lock_stripes.to_string(),
                reason: "lock_stripes must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}
