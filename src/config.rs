//! Tunables for every component, each carrying its documented default.
//!
//! Configuration *loading* is treated as an external concern; these are
//! plain structs the embedding application constructs and passes in, the
//! way a workflow engine is handed a connection pool and a definition map
//! rather than reading its own environment.

use std::time::Duration;

/// Backoff/time policy defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
    pub backlog_enabled: bool,
    pub backlog_tier_delays_days: Vec<u32>,
    pub backlog_max_tier: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3600),
            multiplier: 2.0,
            max_delay: Duration::from_secs(24 * 3600),
            max_attempts: 5,
            jitter: true,
            backlog_enabled: false,
            backlog_tier_delays_days: vec![3, 7, 14, 30],
            backlog_max_tier: 4,
        }
    }
}

/// Priority-score weights. Each is applied as `w.x / 100` in the
/// scoring formula.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorityWeights {
    pub content_age: i64,
    pub missing_duration: i64,
    pub user_priority: i64,
    pub failure_penalty: i64,
    pub gap_bonus: i64,
    pub specials_penalty: i64,
    pub file_lost_bonus: i64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            content_age: 100,
            missing_duration: 100,
            user_priority: 100,
            failure_penalty: 50,
            gap_bonus: 50,
            specials_penalty: 25,
            file_lost_bonus: 200,
        }
    }
}

/// Priority constants shared by every score computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityConstants {
    pub base_score: i64,
    pub max_content_age_days: i64,
    pub max_missing_duration_days: i64,
    pub file_lost_decay_days: i64,
}

impl Default for PriorityConstants {
    fn default() -> Self {
        Self {
            base_score: 1000,
            max_content_age_days: 3650,
            max_missing_duration_days: 365,
            file_lost_decay_days: 30,
        }
    }
}

/// Episode-batching thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchingConfig {
    pub min_missing_percent: f64,
    pub min_missing_count: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            min_missing_percent: 50.0,
            min_missing_count: 3,
        }
    }
}

/// Queue-service defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueConfig {
    pub default_batch_size: u32,
    pub default_dequeue_limit: u32,
    pub max_dequeue_limit: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 1000,
            default_dequeue_limit: 10,
            max_dequeue_limit: 100,
        }
    }
}

/// Per-connector rate-limit profile. Left unshaped by the orchestration
/// rules themselves — this is the minimal shape that satisfies every
/// call site that needs one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitProfile {
    pub requests_per_minute: u32,
    pub rate_limit_pause_seconds: u64,
}

impl Default for RateLimitProfile {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            rate_limit_pause_seconds: 60,
        }
    }
}

/// Common outbound-sender policy shared by connector, indexer-manager, and
/// notification-channel HTTP calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SenderConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl SenderConfig {
    /// Connector/indexer-manager HTTP timeout default.
    pub fn connector_default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            ..Self::notification_default()
        }
    }

    /// Notification channel sender defaults.
    pub fn notification_default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Indexer-health monitor staleness threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexerHealthConfig {
    pub poll_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for IndexerHealthConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            stale_threshold: Duration::from_secs(10 * 60),
        }
    }
}

/// Top-level aggregate, constructed once at startup and shared by reference
/// (no process-wide mutable singleton).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub secret_key: String,
    pub backoff: BackoffConfig,
    pub priority_weights: PriorityWeights,
    pub priority_constants: PriorityConstants,
    pub batching: BatchingConfig,
    pub queue: QueueConfig,
    pub indexer_health: IndexerHealthConfig,
    pub connector_sender: SenderConfig,
    pub notification_sender: SenderConfig,
    /// How long a `searching` row may sit untouched before
    /// `cleanup_orphaned_searching_items` reverts it to `queued`.
    pub orphan_max_age_minutes: i64,
}

impl OrchestratorConfig {
    /// Construct with every default except `secret_key`, which must be
    /// present and exactly 64 hex characters.
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            backoff: BackoffConfig::default(),
            priority_weights: PriorityWeights::default(),
            priority_constants: PriorityConstants::default(),
            batching: BatchingConfig::default(),
            queue: QueueConfig::default(),
            indexer_health: IndexerHealthConfig::default(),
            connector_sender: SenderConfig::connector_default(),
            notification_sender: SenderConfig::notification_default(),
            orphan_max_age_minutes: 15,
        }
    }

    /// How long a `searching` row may go unclaimed before orphan cleanup
    /// reverts it to `queued`, recovering from a crash between dequeue and
    /// dispatch.
    pub fn max_orphan_age_minutes(&self) -> i64 {
        self.orphan_max_age_minutes
    }

    /// Thin env-var convenience loader. Reads only `SECRET_KEY` and a
    /// handful of numeric overrides; everything else keeps its struct
    /// default. A real deployment's config loader is external — this
    /// exists so the fatal-exit condition ("missing/invalid SECRET_KEY")
    /// is actually enforceable by a caller that just wants env-based
    /// startup.
    pub fn from_env() -> Result<Self, crate::error::OrchestratorError> {
        use crate::error::OrchestratorError;

        let secret_key = std::env::var("SECRET_KEY").map_err(|_| {
            OrchestratorError::Configuration("SECRET_KEY is required".into())
        })?;
        if secret_key.len() != 64 || !secret_key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OrchestratorError::Configuration(
                "SECRET_KEY must be exactly 64 hex characters".into(),
            ));
        }

        let mut config = Self::new(secret_key);

        if let Ok(v) = std::env::var("MAX_ATTEMPTS") {
            config.backoff.max_attempts = v.parse().map_err(|_| {
                OrchestratorError::Configuration("MAX_ATTEMPTS must be an integer".into())
            })?;
        }
        if let Ok(v) = std::env::var("BACKLOG_ENABLED") {
            config.backoff.backlog_enabled = v.parse().map_err(|_| {
                OrchestratorError::Configuration("BACKLOG_ENABLED must be true/false".into())
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_rejects_missing_secret() {
        std::env::remove_var("SECRET_KEY");
        assert!(OrchestratorConfig::from_env().is_err());
    }

    #[test]
    fn from_env_rejects_malformed_secret() {
        std::env::set_var("SECRET_KEY", "not-hex");
        let result = OrchestratorConfig::from_env();
        std::env::remove_var("SECRET_KEY");
        assert!(result.is_err());
    }

    #[test]
    fn from_env_accepts_valid_secret() {
        std::env::set_var("SECRET_KEY", "a".repeat(64));
        let result = OrchestratorConfig::from_env();
        std::env::remove_var("SECRET_KEY");
        assert!(result.is_ok());
    }
}
