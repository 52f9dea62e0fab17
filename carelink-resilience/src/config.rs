//! Client configuration.
//!
//! [`ResilienceConfig`] gathers the per-component configs. Every field has
//! a default, so a JSON document only needs the values it overrides.

use crate::batcher::BatchConfig;
use crate::cache::CacheConfig;
use crate::compression::CompressionConfig;
use crate::error::{ResilienceError, ResilienceResult};
use crate::offline::OfflineConfig;
use crate::retry::RetryConfig;
use crate::timeout::TimeoutConfig;
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::ResilientClient`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub timeouts: TimeoutConfig,
    pub cache: CacheConfig,
    pub offline: OfflineConfig,
    pub compression: CompressionConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
}

impl ResilienceConfig {
    /// Parses a (possibly partial) JSON document over the defaults and
    /// validates the result.
    pub fn from_json_str(json: &str) -> ResilienceResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the components cannot work with.
    pub fn validate(&self) -> ResilienceResult<()> {
        let t = &self.timeouts;
        if t.min_timeout_ms > t.max_timeout_ms {
            return Err(invalid(format!(
                "timeouts.min_timeout_ms ({}) exceeds max_timeout_ms ({})",
                t.min_timeout_ms, t.max_timeout_ms
            )));
        }
        if t.max_samples == 0 {
            return Err(invalid("timeouts.max_samples must be at least 1"));
        }
        if !(t.timeout_multiplier.is_finite() && t.timeout_multiplier > 0.0) {
            return Err(invalid("timeouts.timeout_multiplier must be positive"));
        }
        if self.cache.max_entries == 0 && self.cache.enabled {
            return Err(invalid("cache.max_entries must be at least 1 when enabled"));
        }
        if !(self.cache.eviction_fraction > 0.0 && self.cache.eviction_fraction <= 1.0) {
            return Err(invalid("cache.eviction_fraction must be in (0, 1]"));
        }
        if self.offline.max_operations == 0 && self.offline.enabled {
            return Err(invalid("offline.max_operations must be at least 1 when enabled"));
        }
        if self.compression.benefit_threshold < 1.0 {
            return Err(invalid("compression.benefit_threshold must be at least 1.0"));
        }
        if self.batch.max_batch_size == 0 {
            return Err(invalid("batch.max_batch_size must be at least 1"));
        }
        if self.batch.flush_interval_ms == 0 {
            return Err(invalid("batch.flush_interval_ms must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid("retry.backoff_multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ResilienceError {
    ResilienceError::Validation(msg.into())
}
