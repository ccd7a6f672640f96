//! Rate limiter / throttle enforcer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RateLimitProfile;
use crate::domain::{ApiKeyRateLimitState, ConnectorRateLimitState};
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    RateLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub retry_after_ms: Option<i64>,
}

impl AdmissionDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_ms: None,
        }
    }

    fn denied(retry_after_ms: i64) -> Self {
        Self {
            allowed: false,
            reason: Some(DenialReason::RateLimit),
            retry_after_ms: Some(retry_after_ms.max(0)),
        }
    }
}

/// Persistence seam for per-connector rate-limit state. Updates here are
/// single-row atomic.
#[async_trait]
pub trait ThrottleRepository: Send + Sync {
    async fn get_or_init(&self, connector_id: Uuid, now: DateTime<Utc>) -> Result<ConnectorRateLimitState, OrchestratorError>;
    async fn save(&self, state: ConnectorRateLimitState) -> Result<(), OrchestratorError>;
}

/// Checks whether a connector currently admits another dispatch.
pub async fn can_dispatch(
    repo: &dyn ThrottleRepository,
    connector_id: Uuid,
    profile: &RateLimitProfile,
    now: DateTime<Utc>,
) -> Result<AdmissionDecision, OrchestratorError> {
    let state = repo.get_or_init(connector_id, now).await?;

    if let Some(paused_until) = state.paused_until {
        if paused_until > now {
            let retry_after_ms = (paused_until - now).num_milliseconds();
            return Ok(AdmissionDecision::denied(retry_after_ms));
        }
    }

    let window_expired = (now - state.minute_window_start) >= chrono::Duration::seconds(60);
    let requests_in_window = if window_expired { 0 } else { state.requests_this_minute };

    if requests_in_window >= profile.requests_per_minute as i32 {
        let window_reset_at = state.minute_window_start + chrono::Duration::seconds(60);
        let retry_after_ms = (window_reset_at - now).num_milliseconds();
        return Ok(AdmissionDecision::denied(retry_after_ms));
    }

    Ok(AdmissionDecision::allowed())
}

/// `recordRequest(connectorId)`: increments the minute-window counter,
/// rolling the window when `now − minuteWindowStart ≥ 60s`.
pub async fn record_request(
    repo: &dyn ThrottleRepository,
    connector_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), OrchestratorError> {
    let mut state = repo.get_or_init(connector_id, now).await?;

    if (now - state.minute_window_start) >= chrono::Duration::seconds(60) {
        state.minute_window_start = now;
        state.requests_this_minute = 0;
    }
    state.requests_this_minute += 1;
    state.last_request_at = Some(now);
    repo.save(state).await
}

/// `handleRateLimitResponse(connectorId, retryAfterSeconds?)`.
pub async fn handle_rate_limit_response(
    repo: &dyn ThrottleRepository,
    connector_id: Uuid,
    retry_after_seconds: Option<u64>,
    profile: &RateLimitProfile,
    now: DateTime<Utc>,
) -> Result<(), OrchestratorError> {
    let mut state = repo.get_or_init(connector_id, now).await?;

    let pause_seconds = retry_after_seconds
        .unwrap_or(0)
        .max(profile.rate_limit_pause_seconds)
        .max(1);
    state.paused_until = Some(now + chrono::Duration::seconds(pause_seconds as i64));
    repo.save(state).await
}

/// Inbound API-key metering: a fixed one-minute window per key id.
/// `limit = None` denotes unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKeyQuota {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_in_seconds: i64,
}

#[async_trait]
pub trait ApiKeyThrottleRepository: Send + Sync {
    async fn get_or_init(&self, key_id: Uuid, now: DateTime<Utc>) -> Result<ApiKeyRateLimitState, OrchestratorError>;
    async fn save(&self, state: ApiKeyRateLimitState) -> Result<(), OrchestratorError>;
}

pub async fn check_api_key_quota(
    repo: &dyn ApiKeyThrottleRepository,
    key_id: Uuid,
    limit: Option<u32>,
    now: DateTime<Utc>,
) -> Result<ApiKeyQuota, OrchestratorError> {
    let mut state = repo.get_or_init(key_id, now).await?;

    if (now - state.minute_window_start) >= chrono::Duration::seconds(60) {
        state.minute_window_start = now;
        state.requests_this_minute = 0;
    }
    state.requests_this_minute += 1;
    repo.save(state.clone()).await?;

    let reset_in_seconds = (chrono::Duration::seconds(60) - (now - state.minute_window_start)).num_seconds().max(0);
    let remaining = limit.map(|l| l.saturating_sub(state.requests_this_minute.max(0) as u32));

    Ok(ApiKeyQuota {
        limit,
        remaining,
        reset_in_seconds,
    })
}
