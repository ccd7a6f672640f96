//! Indexer-health monitor — polls indexer-manager instances, caches
//! indexer status with a staleness flag. Failures are logged and leave
//! the previous cache intact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::IndexerHealthConfig;
use crate::domain::IndexerHealth;
use crate::error::OrchestratorError;

/// `GET /api/v1/indexer` row shape.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerListEntry {
    pub id: i64,
    pub name: String,
    pub enable: bool,
}

/// `GET /api/v1/indexerstatus` row shape.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerStatusEntry {
    pub id: i64,
    pub indexer_id: i64,
    pub disabled_till: Option<DateTime<Utc>>,
    pub most_recent_failure: Option<String>,
}

/// One indexer-manager instance this monitor polls.
#[async_trait]
pub trait IndexerManagerClient: Send + Sync {
    async fn instance_id(&self) -> Uuid;
    async fn list_indexers(&self) -> Result<Vec<IndexerListEntry>, OrchestratorError>;
    async fn list_indexer_status(&self) -> Result<Vec<IndexerStatusEntry>, OrchestratorError>;
}

#[async_trait]
pub trait IndexerHealthRepository: Send + Sync {
    async fn upsert(&self, rows: &[IndexerHealth]) -> Result<(), OrchestratorError>;
    async fn get_all(&self) -> Result<Vec<IndexerHealth>, OrchestratorError>;
}

/// Poll one instance and upsert its joined `IndexerHealth` rows. Join is by
/// `indexerId`; entries with no status row are treated as not rate-limited.
/// Never propagates a client failure — callers should log and move on.
pub async fn poll_instance(
    client: &dyn IndexerManagerClient,
    repo: &dyn IndexerHealthRepository,
    now: DateTime<Utc>,
) -> Result<usize, OrchestratorError> {
    let instance_id = client.instance_id().await;
    let indexers = client.list_indexers().await?;
    let statuses = client.list_indexer_status().await?;

    let rows: Vec<IndexerHealth> = indexers
        .into_iter()
        .map(|indexer| {
            let status = statuses.iter().find(|s| s.indexer_id == indexer.id);
            IndexerHealth {
                instance_id,
                indexer_id: indexer.id,
                name: indexer.name,
                enabled: indexer.enable,
                is_rate_limited: status.and_then(|s| s.disabled_till).map(|till| till > now).unwrap_or(false),
                rate_limit_expires_at: status.and_then(|s| s.disabled_till),
                most_recent_failure: status.and_then(|s| s.most_recent_failure.clone()),
                last_updated: now,
            }
        })
        .collect();

    let count = rows.len();
    repo.upsert(&rows).await?;
    Ok(count)
}

/// Poll every configured instance; a single instance failing is logged and
/// does not affect the others or clear their cached rows.
pub async fn poll_all(
    clients: &[Box<dyn IndexerManagerClient>],
    repo: &dyn IndexerHealthRepository,
    now: DateTime<Utc>,
) {
    for client in clients {
        match poll_instance(client.as_ref(), repo, now).await {
            Ok(count) => tracing::debug!(count, "polled indexer-manager instance"),
            Err(error) => tracing::warn!(%error, "indexer-manager poll failed, keeping stale cache"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedIndexerHealth {
    pub health: IndexerHealth,
    pub is_stale: bool,
}

/// `getAllCachedHealth()`: a snapshot with `isStale` computed against the
/// configured threshold (default 10 min).
pub async fn get_all_cached_health(
    repo: &dyn IndexerHealthRepository,
    config: &IndexerHealthConfig,
    now: DateTime<Utc>,
) -> Result<Vec<CachedIndexerHealth>, OrchestratorError> {
    let stale_threshold = chrono::Duration::from_std(config.stale_threshold).unwrap_or(chrono::Duration::minutes(10));
    Ok(repo
        .get_all()
        .await?
        .into_iter()
        .map(|health| {
            let is_stale = health.is_stale(now, stale_threshold);
            CachedIndexerHealth { health, is_stale }
        })
        .collect())
}
