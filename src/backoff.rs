//! Backoff & time policy — pure, deterministic-given-RNG.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;

use crate::config::BackoffConfig;

/// `nextEligibleTime(attemptCount, now)`: `now + delay`, where
/// `delay = min(baseDelay · multiplier^max(0, attemptCount−1), maxDelay)`,
/// jittered by a uniform factor in `[0.75, 1.25]` when enabled.
pub fn next_eligible_time(
    attempt_count: u32,
    now: DateTime<Utc>,
    config: &BackoffConfig,
) -> DateTime<Utc> {
    let delay = delay_for_attempt(attempt_count, config);
    now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::max_value())
}

fn delay_for_attempt(attempt_count: u32, config: &BackoffConfig) -> std::time::Duration {
    let exponent = attempt_count.saturating_sub(1);
    let scaled_secs =
        config.base_delay.as_secs_f64() * config.multiplier.powi(exponent as i32);
    let capped_secs = scaled_secs.min(config.max_delay.as_secs_f64());
    let jittered_secs = if config.jitter {
        capped_secs * jitter_factor()
    } else {
        capped_secs
    };
    std::time::Duration::from_secs_f64(jittered_secs.max(0.0))
}

fn jitter_factor() -> f64 {
    rand::thread_rng().gen_range(0.75..=1.25)
}

/// `shouldMarkExhausted(attemptCount) = attemptCount ≥ maxAttempts`.
pub fn should_mark_exhausted(attempt_count: u32, config: &BackoffConfig) -> bool {
    attempt_count >= config.max_attempts
}

/// Backlog-tier delay: `tierDelaysDays[t]·24h ± 12h` jitter.
/// `tier` is 1-based ("newTier = min(backlogTier+1, maxTier)");
/// tier 0 means "no backlog tier entered yet" and is not a valid lookup.
pub fn backlog_tier_delay(tier: u32, now: DateTime<Utc>, config: &BackoffConfig) -> DateTime<Utc> {
    let days = config
        .backlog_tier_delays_days
        .get((tier.saturating_sub(1)) as usize)
        .copied()
        .unwrap_or_else(|| *config.backlog_tier_delays_days.last().unwrap_or(&1));

    let base_secs = days as f64 * 24.0 * 3600.0;
    let jitter_secs = if config.jitter {
        rand::thread_rng().gen_range(-12.0 * 3600.0..=12.0 * 3600.0)
    } else {
        0.0
    };
    let total_secs = (base_secs + jitter_secs).max(0.0);
    now + ChronoDuration::from_std(std::time::Duration::from_secs_f64(total_secs))
        .unwrap_or(ChronoDuration::max_value())
}
