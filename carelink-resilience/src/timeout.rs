//! Adaptive per-endpoint timeouts.
//!
//! Each logical endpoint keeps a bounded history of recent call outcomes
//! (its [`TimingProfile`]). The deadline for the next call is the mean of
//! the *successful* durations times a multiplier, clamped to the configured
//! bounds. Failed samples stay in the history (they count toward
//! [`AdaptiveTimeoutManager::has_sufficient_data`]) but never feed the mean,
//! so a run of timeouts cannot ratchet the deadline up to the ceiling.

use crate::events::{EventBus, ResilienceEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Escalation applied to the fallback when every recorded attempt failed.
const ALL_FAILED_ESCALATION: f64 = 1.5;

/// Configuration for the adaptive timeout manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Lower bound for any computed timeout (ms).
    pub min_timeout_ms: u64,
    /// Upper bound for any computed timeout (ms).
    pub max_timeout_ms: u64,
    /// Factor applied to the mean successful duration.
    pub timeout_multiplier: f64,
    /// Samples kept per endpoint.
    pub max_samples: usize,
    /// Timeout used before an endpoint has any history (ms).
    pub fallback_timeout_ms: u64,
    /// Log every adjustment at debug level.
    pub enable_logging: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            min_timeout_ms: 30_000,
            max_timeout_ms: 120_000,
            timeout_multiplier: 2.0,
            max_samples: 10,
            fallback_timeout_ms: 30_000,
            enable_logging: false,
        }
    }
}

/// One observed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSample {
    pub duration_ms: u64,
    pub success: bool,
    pub observed_at: DateTime<Utc>,
}

/// Recent call history for one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingProfile {
    pub endpoint_key: String,
    /// Oldest first.
    pub samples: VecDeque<TimingSample>,
    pub current_timeout_ms: u64,
    pub adjustment_count: u64,
    pub last_adjusted_at: DateTime<Utc>,
}

impl TimingProfile {
    fn new(endpoint_key: &str, initial_timeout_ms: u64) -> Self {
        Self {
            endpoint_key: endpoint_key.to_string(),
            samples: VecDeque::new(),
            current_timeout_ms: initial_timeout_ms,
            adjustment_count: 0,
            last_adjusted_at: Utc::now(),
        }
    }

    /// Mean duration of the successful samples, if there are any.
    pub fn mean_success_ms(&self) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|s| s.success)
            .fold((0u64, 0u64), |(sum, n), s| (sum + s.duration_ms, n + 1));
        (count > 0).then(|| sum as f64 / count as f64)
    }
}

/// Diagnostic view of one endpoint's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub endpoint_key: String,
    pub sample_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub mean_success_ms: Option<f64>,
    pub current_timeout_ms: u64,
    pub adjustment_count: u64,
    pub last_adjusted_at: DateTime<Utc>,
}

impl From<&TimingProfile> for EndpointStats {
    fn from(profile: &TimingProfile) -> Self {
        let success_count = profile.samples.iter().filter(|s| s.success).count();
        Self {
            endpoint_key: profile.endpoint_key.clone(),
            sample_count: profile.samples.len(),
            success_count,
            failure_count: profile.samples.len() - success_count,
            mean_success_ms: profile.mean_success_ms(),
            current_timeout_ms: profile.current_timeout_ms,
            adjustment_count: profile.adjustment_count,
            last_adjusted_at: profile.last_adjusted_at,
        }
    }
}

/// Computes call deadlines from observed latency.
pub struct AdaptiveTimeoutManager {
    config: RwLock<TimeoutConfig>,
    profiles: RwLock<HashMap<String, TimingProfile>>,
    events: Option<Arc<EventBus>>,
}

impl AdaptiveTimeoutManager {
    /// Creates a manager with an empty profile store.
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config: RwLock::new(config),
            profiles: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Creates a manager that reports adjustments on `events`.
    pub fn with_events(config: TimeoutConfig, events: Arc<EventBus>) -> Self {
        Self {
            events: Some(events),
            ..Self::new(config)
        }
    }

    /// Records the outcome of one call and recomputes the endpoint's timeout.
    pub async fn record_outcome(&self, endpoint_key: &str, duration_ms: u64, success: bool) {
        let config = self.config.read().await.clone();
        let (previous, current) = {
            let mut profiles = self.profiles.write().await;
            let profile = profiles
                .entry(endpoint_key.to_string())
                .or_insert_with(|| TimingProfile::new(endpoint_key, config.fallback_timeout_ms));

            profile.samples.push_back(TimingSample {
                duration_ms,
                success,
                observed_at: Utc::now(),
            });
            while profile.samples.len() > config.max_samples {
                profile.samples.pop_front();
            }

            let previous = profile.current_timeout_ms;
            profile.current_timeout_ms = compute_timeout(profile, &config);
            profile.adjustment_count += 1;
            profile.last_adjusted_at = Utc::now();
            (previous, profile.current_timeout_ms)
        };

        if config.enable_logging {
            debug!(
                endpoint = endpoint_key,
                duration_ms, success, previous, current, "adaptive timeout adjusted"
            );
        }
        if previous != current {
            if let Some(events) = &self.events {
                events
                    .emit(&ResilienceEvent::TimeoutAdjusted {
                        endpoint_key: endpoint_key.to_string(),
                        previous_ms: previous,
                        current_ms: current,
                    })
                    .await;
            }
        }
    }

    /// Returns the deadline to use for the next call to `endpoint_key`.
    ///
    /// An explicit override is returned unchanged.
    pub async fn get_adaptive_timeout(&self, endpoint_key: &str, override_ms: Option<u64>) -> u64 {
        if let Some(ms) = override_ms {
            return ms;
        }
        let config = self.config.read().await;
        match self.profiles.read().await.get(endpoint_key) {
            Some(profile) => compute_timeout(profile, &config),
            None => config.fallback_timeout_ms,
        }
    }

    /// Whether the endpoint has at least `min_sample_count` samples.
    pub async fn has_sufficient_data(&self, endpoint_key: &str, min_sample_count: usize) -> bool {
        self.profiles
            .read()
            .await
            .get(endpoint_key)
            .is_some_and(|p| p.samples.len() >= min_sample_count)
    }

    /// The timeout computed at the last recorded outcome, or the fallback.
    pub async fn get_current_timeout(&self, endpoint_key: &str) -> u64 {
        match self.profiles.read().await.get(endpoint_key) {
            Some(profile) => profile.current_timeout_ms,
            None => self.config.read().await.fallback_timeout_ms,
        }
    }

    /// Returns a copy of the endpoint's profile.
    pub async fn get_profile(&self, endpoint_key: &str) -> Option<TimingProfile> {
        self.profiles.read().await.get(endpoint_key).cloned()
    }

    pub async fn get_endpoint_stats(&self, endpoint_key: &str) -> Option<EndpointStats> {
        self.profiles
            .read()
            .await
            .get(endpoint_key)
            .map(EndpointStats::from)
    }

    /// Stats for every tracked endpoint, sorted by endpoint key.
    pub async fn get_all_stats(&self) -> Vec<EndpointStats> {
        let mut stats: Vec<EndpointStats> = self
            .profiles
            .read()
            .await
            .values()
            .map(EndpointStats::from)
            .collect();
        stats.sort_by(|a, b| a.endpoint_key.cmp(&b.endpoint_key));
        stats
    }

    pub async fn endpoint_count(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn clear_endpoint_stats(&self, endpoint_key: &str) {
        self.profiles.write().await.remove(endpoint_key);
    }

    pub async fn clear_all_stats(&self) {
        self.profiles.write().await.clear();
    }

    /// Replaces the configuration. Existing histories are trimmed to the
    /// new bound on their next recorded outcome.
    pub async fn update_config(&self, config: TimeoutConfig) {
        *self.config.write().await = config;
    }

    pub async fn get_config(&self) -> TimeoutConfig {
        self.config.read().await.clone()
    }
}

impl Default for AdaptiveTimeoutManager {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}

fn compute_timeout(profile: &TimingProfile, config: &TimeoutConfig) -> u64 {
    let raw = match profile.mean_success_ms() {
        Some(mean) => mean * config.timeout_multiplier,
        None => config.fallback_timeout_ms as f64 * ALL_FAILED_ESCALATION,
    };
    clamp_ms(raw, config.min_timeout_ms, config.max_timeout_ms)
}

fn clamp_ms(value: f64, min: u64, max: u64) -> u64 {
    (value.round() as u64).clamp(min, max.max(min))
}
