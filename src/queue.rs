//! Queue service — enqueue pending rows into a per-connector request
//! queue; atomically dequeue in priority order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{PriorityConstants, PriorityWeights, QueueConfig};
use crate::domain::{PriorityInput, RegistryState, RequestQueueRow, SearchRegistryEntry};
use crate::error::OrchestratorError;
use crate::priority::calculate_priority;
use crate::registry::SearchRegistryRepository;

/// Supplies the content-table fields the enqueue step needs joined in:
/// air date for episodes, Jan 1 of year for movies, specials season
/// number for episodes, prior-download info for the lost-file bonus. An
/// external concern, modeled here as a trait so enqueue can be tested
/// without a real content catalog.
#[async_trait]
pub trait ContentMetadataLookup: Send + Sync {
    async fn priority_input(
        &self,
        entry: &SearchRegistryEntry,
        now: DateTime<Utc>,
    ) -> Result<PriorityInput, OrchestratorError>;
}

/// Persistence seam for the request queue.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn is_queue_paused(&self, connector_id: Uuid) -> Result<bool, OrchestratorError>;
    async fn set_queue_paused(&self, connector_id: Uuid, paused: bool) -> Result<(), OrchestratorError>;

    /// Registry rows in `pending` state for this connector that do not
    /// already have a queue row.
    async fn find_pending_not_queued(
        &self,
        connector_id: Uuid,
    ) -> Result<Vec<SearchRegistryEntry>, OrchestratorError>;

    /// Insert-if-not-exists on `searchRegistryId` (unique). Returns the
    /// number of rows actually inserted (idempotent: repeated calls with
    /// the same ids insert nothing more).
    async fn insert_if_absent(&self, rows: &[RequestQueueRow]) -> Result<u64, OrchestratorError>;

    /// Atomic claim: select up to `limit` rows ready at-or-before
    /// `scheduled_before`, ordered by `priority DESC, scheduledAt ASC`, and
    /// delete them in the same statement. Two concurrent callers must see
    /// disjoint results.
    async fn dequeue(
        &self,
        connector_id: Uuid,
        limit: u32,
        scheduled_before: DateTime<Utc>,
    ) -> Result<Vec<RequestQueueRow>, OrchestratorError>;

    /// Deletes queue rows (optionally scoped to one connector) and returns
    /// the registry ids whose queue row was removed.
    async fn clear(&self, connector_id: Option<Uuid>) -> Result<Vec<Uuid>, OrchestratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnqueueReport {
    pub enqueued: u64,
}

/// `enqueuePendingItems(connectorId, {batchSize, scheduledAt})`.
pub async fn enqueue_pending_items(
    queue_repo: &dyn QueueRepository,
    registry_repo: &dyn SearchRegistryRepository,
    content_lookup: &dyn ContentMetadataLookup,
    connector_id: Uuid,
    batch_size: u32,
    scheduled_at: DateTime<Utc>,
    weights: &PriorityWeights,
    constants: &PriorityConstants,
) -> Result<EnqueueReport, OrchestratorError> {
    let pending = queue_repo.find_pending_not_queued(connector_id).await?;
    let mut total_enqueued = 0u64;

    for chunk in pending.chunks(batch_size.max(1) as usize) {
        let mut rows = Vec::with_capacity(chunk.len());
        for entry in chunk {
            let priority_input = content_lookup.priority_input(entry, scheduled_at).await?;
            let result = calculate_priority(&priority_input, weights, constants, scheduled_at);

            let mut updated = entry.clone();
            updated.state = RegistryState::Queued;
            updated.priority = result.score;
            updated.updated_at = scheduled_at;
            registry_repo.update(updated).await?;

            rows.push(RequestQueueRow {
                id: Uuid::new_v4(),
                search_registry_id: entry.id,
                connector_id,
                priority: result.score,
                scheduled_at,
            });
        }
        total_enqueued += queue_repo.insert_if_absent(&rows).await?;
    }

    Ok(EnqueueReport {
        enqueued: total_enqueued,
    })
}

/// `dequeuePriorityItems(connectorId, {limit, scheduledBefore})`.
///
/// Registry state is left at `queued` by design — the dispatcher calls
/// `set_searching` per item immediately before dispatch,
/// which is what lets orphan cleanup recover a crash between dequeue and
/// dispatch.
pub async fn dequeue_priority_items(
    queue_repo: &dyn QueueRepository,
    connector_id: Uuid,
    limit: u32,
    scheduled_before: DateTime<Utc>,
    config: &QueueConfig,
) -> Result<Vec<RequestQueueRow>, OrchestratorError> {
    if queue_repo.is_queue_paused(connector_id).await? {
        return Ok(Vec::new());
    }
    let bounded_limit = limit.clamp(1, config.max_dequeue_limit);
    queue_repo.dequeue(connector_id, bounded_limit, scheduled_before).await
}

pub async fn pause_queue(queue_repo: &dyn QueueRepository, connector_id: Uuid) -> Result<(), OrchestratorError> {
    queue_repo.set_queue_paused(connector_id, true).await
}

pub async fn resume_queue(queue_repo: &dyn QueueRepository, connector_id: Uuid) -> Result<(), OrchestratorError> {
    queue_repo.set_queue_paused(connector_id, false).await
}

/// `clearQueue(connectorId?)`: deletes queue rows and reverts matching
/// `state=queued` rows to `pending`.
pub async fn clear_queue(
    queue_repo: &dyn QueueRepository,
    registry_repo: &dyn SearchRegistryRepository,
    connector_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<u64, OrchestratorError> {
    let reverted_ids = queue_repo.clear(connector_id).await?;
    for id in &reverted_ids {
        if let Some(mut entry) = registry_repo.get(*id).await? {
            if entry.state == RegistryState::Queued {
                entry.state = RegistryState::Pending;
                entry.updated_at = now;
                registry_repo.update(entry).await?;
            }
        }
    }
    Ok(reverted_ids.len() as u64)
}
