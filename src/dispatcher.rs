//! Search dispatcher — the per-item unit of work that ties together
//! throttle admission, credential decryption, the connector HTTP client, and
//! the registry state machine.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::client::{ConnectorClient, ConnectorClientFactory};
use crate::config::{BackoffConfig, RateLimitProfile};
use crate::crypto::CredentialCipher;
use crate::domain::{Connector, FailureCategory, SearchType};
use crate::error::{ErrorCategory, OrchestratorError};
use crate::indexer_health::{get_all_cached_health, IndexerHealthRepository};
use crate::registry::{self, SearchRegistryRepository};
use crate::throttle::{self, ThrottleRepository};

/// What to search for, resolved by the caller from the registry entry's
/// content type and the episode batcher's decision.
#[derive(Debug, Clone)]
pub enum SearchTarget {
    Episodes { episode_ids: Vec<i64> },
    Season { series_id: i64, season_number: i32 },
    Movies { movie_ids: Vec<i64> },
}

/// One item of work for `dispatchSearch`.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub registry_id: Uuid,
    pub connector: Connector,
    pub target: SearchTarget,
    pub search_type: SearchType,
    pub was_season_pack_search: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub success: bool,
    pub command_id: Option<i64>,
    pub rate_limited: bool,
    pub connector_paused: bool,
    pub error_category: Option<ErrorCategory>,
    pub skipped: bool,
}

impl DispatchOutcome {
    fn success(command_id: i64) -> Self {
        Self {
            success: true,
            command_id: Some(command_id),
            rate_limited: false,
            connector_paused: false,
            error_category: None,
            skipped: false,
        }
    }

    fn rate_limited() -> Self {
        Self {
            success: false,
            command_id: None,
            rate_limited: true,
            connector_paused: true,
            error_category: Some(ErrorCategory::RateLimit),
            skipped: false,
        }
    }

    fn failed(category: ErrorCategory) -> Self {
        Self {
            success: false,
            command_id: None,
            rate_limited: false,
            connector_paused: false,
            error_category: Some(category),
            skipped: false,
        }
    }

    fn skipped() -> Self {
        Self {
            success: false,
            command_id: None,
            rate_limited: false,
            connector_paused: true,
            error_category: None,
            skipped: true,
        }
    }
}

/// Resolves an `OrchestratorError` surfaced by a connector call into the
/// `FailureCategory` stored on the registry row (a subset of
/// `ErrorCategory`).
fn to_failure_category(error: &OrchestratorError) -> FailureCategory {
    match error.category() {
        ErrorCategory::Network => FailureCategory::Network,
        ErrorCategory::Timeout => FailureCategory::Timeout,
        ErrorCategory::RateLimit => FailureCategory::RateLimit,
        ErrorCategory::Server => FailureCategory::Server,
        ErrorCategory::Authentication | ErrorCategory::Decryption => FailureCategory::Authentication,
        ErrorCategory::Configuration | ErrorCategory::Validation | ErrorCategory::Unknown => FailureCategory::Unknown,
    }
}

/// Executes a single dispatch: throttle admission, credential decryption,
/// the connector call, and translation into an outcome the caller folds
/// back into the registry.
///
/// Indexer health is snapshotted purely for the caller's logging/metrics —
/// a stale or missing cache never blocks or alters dispatch.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_search(
    registry_repo: &dyn SearchRegistryRepository,
    throttle_repo: &dyn ThrottleRepository,
    indexer_health_repo: Option<&dyn IndexerHealthRepository>,
    cipher: &CredentialCipher,
    client_factory: &dyn ConnectorClientFactory,
    backoff_config: &BackoffConfig,
    rate_limit_profile: &RateLimitProfile,
    request: &DispatchRequest,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome, OrchestratorError> {
    let admission = throttle::can_dispatch(throttle_repo, request.connector.id, rate_limit_profile, now).await?;
    if !admission.allowed {
        return Ok(DispatchOutcome::rate_limited());
    }

    if let Some(health_repo) = indexer_health_repo {
        match get_all_cached_health(health_repo, &crate::config::IndexerHealthConfig::default(), now).await {
            Ok(snapshot) => {
                let rate_limited_count = snapshot.iter().filter(|h| h.health.is_rate_limited).count();
                tracing::debug!(rate_limited_count, connector_id = %request.connector.id, "indexer health snapshot before dispatch");
            }
            Err(error) => tracing::warn!(%error, "failed to read indexer health cache, proceeding without it"),
        }
    }

    let api_key = match cipher.decrypt(&request.connector.encrypted_api_key) {
        Ok(key) => key,
        Err(_) => {
            registry::mark_failed(
                registry_repo,
                backoff_config,
                request.registry_id,
                FailureCategory::Authentication,
                request.was_season_pack_search,
                now,
            )
            .await?;
            return Ok(DispatchOutcome::failed(ErrorCategory::Decryption));
        }
    };

    let client = client_factory.build(
        request.connector.id,
        request.connector.connector_type,
        &request.connector.base_url,
        &api_key,
    );

    let result = send(client.as_ref(), &request.target).await;

    match result {
        Ok(command_id) => {
            throttle::record_request(throttle_repo, request.connector.id, now).await?;
            registry::mark_search_dispatched(registry_repo, backoff_config, request.registry_id, request.search_type, now).await?;
            Ok(DispatchOutcome::success(command_id))
        }
        Err(error) if error.category() == ErrorCategory::RateLimit => {
            let retry_after_seconds = error.retry_after().map(|d| d.as_secs());
            throttle::handle_rate_limit_response(throttle_repo, request.connector.id, retry_after_seconds, rate_limit_profile, now).await?;
            registry::mark_failed(
                registry_repo,
                backoff_config,
                request.registry_id,
                FailureCategory::RateLimit,
                request.was_season_pack_search,
                now,
            )
            .await?;
            Ok(DispatchOutcome::rate_limited())
        }
        Err(error) => {
            let category = to_failure_category(&error);
            registry::mark_failed(registry_repo, backoff_config, request.registry_id, category, request.was_season_pack_search, now).await?;
            Ok(DispatchOutcome::failed(error.category()))
        }
    }
}

async fn send(client: &dyn ConnectorClient, target: &SearchTarget) -> Result<i64, OrchestratorError> {
    let command = match target {
        SearchTarget::Episodes { episode_ids } => client.send_episode_search(episode_ids).await,
        SearchTarget::Season { series_id, season_number } => client.send_season_search(*series_id, *season_number).await,
        SearchTarget::Movies { movie_ids } => client.send_movies_search(movie_ids).await,
    }?;
    Ok(command.0)
}

/// `dispatchBatch(items)`: sequential, stopping as soon as a connector is
/// found paused — every remaining item for that run is reported `skipped`
/// rather than attempted against a connector known to be throttled.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_batch(
    registry_repo: &dyn SearchRegistryRepository,
    throttle_repo: &dyn ThrottleRepository,
    indexer_health_repo: Option<&dyn IndexerHealthRepository>,
    cipher: &CredentialCipher,
    client_factory: &dyn ConnectorClientFactory,
    backoff_config: &BackoffConfig,
    rate_limit_profile: &RateLimitProfile,
    requests: &[DispatchRequest],
    now: DateTime<Utc>,
) -> Result<Vec<DispatchOutcome>, OrchestratorError> {
    let mut outcomes = Vec::with_capacity(requests.len());
    let mut paused = false;

    for request in requests {
        if paused {
            outcomes.push(DispatchOutcome::skipped());
            continue;
        }

        let outcome = dispatch_search(
            registry_repo,
            throttle_repo,
            indexer_health_repo,
            cipher,
            client_factory,
            backoff_config,
            rate_limit_profile,
            request,
            now,
        )
        .await?;

        if outcome.connector_paused {
            paused = true;
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}
