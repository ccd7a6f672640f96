//! Retry utility — generic retry-with-backoff wrapper for outbound HTTP.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<crate::config::SenderConfig> for RetryConfig {
    fn from(sender: crate::config::SenderConfig) -> Self {
        Self {
            max_retries: sender.max_retries,
            base_delay: sender.base_delay,
            max_delay: sender.max_delay,
            multiplier: sender.multiplier,
            jitter: sender.jitter,
        }
    }
}

/// `calculateBackoffDelay(attempt, cfg) = min(baseDelay · multiplier^attempt, maxDelay)`,
/// then, if jitter, multiplied by uniform `[0.75, 1.25]` and floored to an integer.
pub fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let scaled_secs = config.base_delay.as_secs_f64() * config.multiplier.powi(attempt as i32);
    let capped_secs = scaled_secs.min(config.max_delay.as_secs_f64());
    let jittered_secs = if config.jitter {
        capped_secs * rand::thread_rng().gen_range(0.75..=1.25)
    } else {
        capped_secs
    };
    Duration::from_secs(jittered_secs.max(0.0).floor() as u64)
}

/// `withRetry(fn, cfg)`: executes `fn`; on a retryable error, sleeps
/// `calculateBackoffDelay` (or exactly `retry_after` for a rate-limit error
/// that carries one) and retries up to `maxRetries` total.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.retryable() || attempt >= config.max_retries => return Err(err),
            Err(err) => {
                let delay = err.retry_after().unwrap_or_else(|| calculate_backoff_delay(attempt, config));
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let config = no_jitter();
        assert_eq!(calculate_backoff_delay(0, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff_delay(1, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff_delay(2, &config), Duration::from_secs(4));
        assert_eq!(calculate_backoff_delay(10, &config), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
            ..no_jitter()
        };
        let mut attempts = 0;
        let result: Result<&str, OrchestratorError> = with_retry(&config, || {
            attempts += 1;
            let succeed_now = attempts >= 3;
            async move {
                if succeed_now {
                    Ok("ok")
                } else {
                    Err(OrchestratorError::Network("transient".into()))
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_error_short_circuits() {
        let config = no_jitter();
        let mut attempts = 0;
        let result: Result<(), OrchestratorError> = with_retry(&config, || {
            attempts += 1;
            async { Err(OrchestratorError::Authentication("bad key".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_retries() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: false,
            max_retries: 2,
            ..no_jitter()
        };
        let mut attempts = 0;
        let result: Result<(), OrchestratorError> = with_retry(&config, || {
            attempts += 1;
            async { Err(OrchestratorError::Server { status: 500 }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3); // initial + 2 retries
    }
}
