//! End-to-end exercise of the registry/queue pair across a full lifecycle:
//! pending -> queued -> searching -> cooldown -> pending (re-eligible) ->
//! searching -> exhausted, wiring the state machine and the queue service
//! together against in-memory fakes rather than a live database.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use search_orchestrator::config::{BackoffConfig, PriorityConstants, PriorityWeights, QueueConfig};
use search_orchestrator::domain::{
    ContentType, FailureCategory, PriorityInput, RegistryState, RequestQueueRow, SearchRegistryEntry, SearchType,
};
use search_orchestrator::error::OrchestratorError;
use search_orchestrator::queue::{self, ContentMetadataLookup, QueueRepository};
use search_orchestrator::registry::{self, SearchRegistryRepository};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

fn fresh_entry(connector_id: Uuid) -> SearchRegistryEntry {
    let t = now();
    SearchRegistryEntry {
        id: Uuid::new_v4(),
        connector_id,
        content_type: ContentType::Episode,
        content_id: Uuid::new_v4(),
        search_type: SearchType::Gap,
        state: RegistryState::Pending,
        attempt_count: 0,
        priority: 0,
        next_eligible: None,
        last_searched: None,
        failure_category: None,
        backlog_tier: 0,
        season_pack_failed: false,
        created_at: t,
        updated_at: t,
    }
}

#[derive(Default)]
struct InMemoryStore {
    registry: Mutex<HashMap<Uuid, SearchRegistryEntry>>,
    queue: Mutex<HashMap<Uuid, RequestQueueRow>>,
    paused: Mutex<HashMap<Uuid, bool>>,
}

#[async_trait]
impl SearchRegistryRepository for InMemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<SearchRegistryEntry>, OrchestratorError> {
        Ok(self.registry.lock().unwrap().get(&id).cloned())
    }

    async fn cas_update(
        &self,
        id: Uuid,
        expected_state: RegistryState,
        updated: SearchRegistryEntry,
    ) -> Result<bool, OrchestratorError> {
        let mut rows = self.registry.lock().unwrap();
        match rows.get(&id) {
            Some(current) if current.state == expected_state => {
                rows.insert(id, updated);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update(&self, updated: SearchRegistryEntry) -> Result<(), OrchestratorError> {
        self.registry.lock().unwrap().insert(updated.id, updated);
        Ok(())
    }

    async fn find_cooldown_eligible(
        &self,
        connector_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
        Ok(self
            .registry
            .lock()
            .unwrap()
            .values()
            .filter(|e| {
                e.state == RegistryState::Cooldown
                    && e.next_eligible.map(|t| t <= now).unwrap_or(false)
                    && connector_id.map(|c| c == e.connector_id).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn count_still_cooling(
        &self,
        connector_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, OrchestratorError> {
        Ok(self
            .registry
            .lock()
            .unwrap()
            .values()
            .filter(|e| {
                e.state == RegistryState::Cooldown
                    && e.next_eligible.map(|t| t > now).unwrap_or(false)
                    && connector_id.map(|c| c == e.connector_id).unwrap_or(true)
            })
            .count() as u64)
    }

    async fn find_stale_searching(
        &self,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
        Ok(self
            .registry
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.state == RegistryState::Searching && now - e.updated_at > max_age)
            .cloned()
            .collect())
    }

    async fn find_season_sibling_ids(&self, _entry: &SearchRegistryEntry) -> Result<Vec<Uuid>, OrchestratorError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl QueueRepository for InMemoryStore {
    async fn is_queue_paused(&self, connector_id: Uuid) -> Result<bool, OrchestratorError> {
        Ok(*self.paused.lock().unwrap().get(&connector_id).unwrap_or(&false))
    }

    async fn set_queue_paused(&self, connector_id: Uuid, paused: bool) -> Result<(), OrchestratorError> {
        self.paused.lock().unwrap().insert(connector_id, paused);
        Ok(())
    }

    async fn find_pending_not_queued(&self, connector_id: Uuid) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
        let queued_ids: std::collections::HashSet<_> =
            self.queue.lock().unwrap().values().map(|r| r.search_registry_id).collect();
        Ok(self
            .registry
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.connector_id == connector_id && e.state == RegistryState::Pending && !queued_ids.contains(&e.id))
            .cloned()
            .collect())
    }

    async fn insert_if_absent(&self, rows: &[RequestQueueRow]) -> Result<u64, OrchestratorError> {
        let mut queue = self.queue.lock().unwrap();
        let existing: std::collections::HashSet<_> = queue.values().map(|r| r.search_registry_id).collect();
        let mut inserted = 0u64;
        for row in rows {
            if !existing.contains(&row.search_registry_id) {
                queue.insert(row.id, row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn dequeue(
        &self,
        connector_id: Uuid,
        limit: u32,
        scheduled_before: DateTime<Utc>,
    ) -> Result<Vec<RequestQueueRow>, OrchestratorError> {
        let mut queue = self.queue.lock().unwrap();
        let mut candidates: Vec<RequestQueueRow> = queue
            .values()
            .filter(|r| r.connector_id == connector_id && r.scheduled_at <= scheduled_before)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.scheduled_at.cmp(&b.scheduled_at)));
        candidates.truncate(limit as usize);
        for row in &candidates {
            queue.remove(&row.id);
        }
        Ok(candidates)
    }

    async fn clear(&self, connector_id: Option<Uuid>) -> Result<Vec<Uuid>, OrchestratorError> {
        let mut queue = self.queue.lock().unwrap();
        let to_remove: Vec<Uuid> = queue
            .values()
            .filter(|r| connector_id.map(|c| c == r.connector_id).unwrap_or(true))
            .map(|r| r.id)
            .collect();
        let mut registry_ids = Vec::with_capacity(to_remove.len());
        for id in &to_remove {
            if let Some(row) = queue.remove(id) {
                registry_ids.push(row.search_registry_id);
            }
        }
        Ok(registry_ids)
    }
}

struct FixedContentLookup;

#[async_trait]
impl ContentMetadataLookup for FixedContentLookup {
    async fn priority_input(&self, entry: &SearchRegistryEntry, now: DateTime<Utc>) -> Result<PriorityInput, OrchestratorError> {
        Ok(PriorityInput {
            search_type: entry.search_type,
            content_date: Some(now - chrono::Duration::days(5)),
            discovered_at: now - chrono::Duration::days(1),
            user_priority_override: 0,
            attempt_count: entry.attempt_count,
            season_number: None,
            was_downloaded: false,
            file_lost_at: None,
        })
    }
}

#[tokio::test]
async fn full_lifecycle_through_exhaustion() {
    let store = InMemoryStore::default();
    let connector_id = Uuid::new_v4();
    let entry = fresh_entry(connector_id);
    let registry_id = entry.id;
    store.registry.lock().unwrap().insert(registry_id, entry);

    let weights = PriorityWeights::default();
    let constants = PriorityConstants::default();
    let queue_config = QueueConfig::default();
    let backoff_config = BackoffConfig {
        max_attempts: 2,
        jitter: false,
        ..BackoffConfig::default()
    };

    let report = queue::enqueue_pending_items(
        &store,
        &store,
        &FixedContentLookup,
        connector_id,
        queue_config.default_batch_size,
        now(),
        &weights,
        &constants,
    )
    .await
    .unwrap();
    assert_eq!(report.enqueued, 1);
    assert_eq!(
        store.registry.lock().unwrap().get(&registry_id).unwrap().state,
        RegistryState::Queued
    );

    // Idempotence: re-enqueueing inserts nothing more, since the row is
    // no longer `pending`.
    let second_report = queue::enqueue_pending_items(
        &store,
        &store,
        &FixedContentLookup,
        connector_id,
        queue_config.default_batch_size,
        now(),
        &weights,
        &constants,
    )
    .await
    .unwrap();
    assert_eq!(second_report.enqueued, 0);

    let dequeued = queue::dequeue_priority_items(&store, connector_id, 10, now(), &queue_config)
        .await
        .unwrap();
    assert_eq!(dequeued.len(), 1);
    assert!(store.queue.lock().unwrap().is_empty());
    assert_eq!(
        store.registry.lock().unwrap().get(&registry_id).unwrap().state,
        RegistryState::Queued,
        "registry state stays `queued` across dequeue; the dispatcher claims it separately"
    );

    let claim = registry::set_searching(&store, registry_id, now()).await.unwrap();
    assert!(claim.success);
    assert_eq!(claim.new_state, Some(RegistryState::Searching));

    // First failure: below max_attempts(2) => cooldown, attempt_count=1.
    let first_failure = registry::mark_failed(&store, &backoff_config, registry_id, FailureCategory::NoResults, false, now())
        .await
        .unwrap();
    assert!(first_failure.success);
    assert_eq!(first_failure.new_state, Some(RegistryState::Cooldown));
    {
        let row = store.registry.lock().unwrap().get(&registry_id).unwrap().clone();
        assert_eq!(row.attempt_count, 1);
        assert!(row.next_eligible.is_some());
        assert!(row.invariants_hold());
    }

    // Cooldown not yet eligible: reenqueue sweep finds nothing ready.
    let too_early = registry::reenqueue_eligible_cooldown_items(&store, Some(connector_id), now())
        .await
        .unwrap();
    assert_eq!(too_early.reenqueued, 0);
    assert_eq!(too_early.still_cooling, 1);

    // Advance past next_eligible and re-sweep.
    let later = {
        let row = store.registry.lock().unwrap().get(&registry_id).unwrap().clone();
        row.next_eligible.unwrap() + chrono::Duration::seconds(1)
    };
    let ready = registry::reenqueue_eligible_cooldown_items(&store, Some(connector_id), later)
        .await
        .unwrap();
    assert_eq!(ready.reenqueued, 1);
    assert_eq!(
        store.registry.lock().unwrap().get(&registry_id).unwrap().state,
        RegistryState::Pending
    );

    // Second pass through the queue, then a second (exhausting) failure.
    queue::enqueue_pending_items(
        &store,
        &store,
        &FixedContentLookup,
        connector_id,
        queue_config.default_batch_size,
        later,
        &weights,
        &constants,
    )
    .await
    .unwrap();
    queue::dequeue_priority_items(&store, connector_id, 10, later, &queue_config)
        .await
        .unwrap();
    registry::set_searching(&store, registry_id, later).await.unwrap();

    let second_failure = registry::mark_failed(&store, &backoff_config, registry_id, FailureCategory::NoResults, false, later)
        .await
        .unwrap();
    assert!(second_failure.success);
    assert_eq!(second_failure.new_state, Some(RegistryState::Exhausted));
    let final_row = store.registry.lock().unwrap().get(&registry_id).unwrap().clone();
    assert_eq!(final_row.attempt_count, 2);
    assert!(final_row.next_eligible.is_none());
    assert!(final_row.invariants_hold());
}

#[tokio::test]
async fn orphaned_searching_row_is_recovered() {
    let store = InMemoryStore::default();
    let connector_id = Uuid::new_v4();
    let mut entry = fresh_entry(connector_id);
    entry.state = RegistryState::Searching;
    entry.updated_at = now() - chrono::Duration::minutes(45);
    let registry_id = entry.id;
    store.registry.lock().unwrap().insert(registry_id, entry);

    let report = registry::cleanup_orphaned_searching_items(&store, 30, now()).await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(
        store.registry.lock().unwrap().get(&registry_id).unwrap().state,
        RegistryState::Queued
    );
}

#[tokio::test]
async fn concurrent_dequeues_return_disjoint_sets() {
    // Concurrent dequeue calls on the same connector must return disjoint
    // item sets whose union is <= the total ready items.
    let store = std::sync::Arc::new(InMemoryStore::default());
    let connector_id = Uuid::new_v4();
    let queue_config = QueueConfig::default();

    for i in 0..20 {
        let row = RequestQueueRow {
            id: Uuid::new_v4(),
            search_registry_id: Uuid::new_v4(),
            connector_id,
            priority: i,
            scheduled_at: now(),
        };
        store.queue.lock().unwrap().insert(row.id, row);
    }

    let (a, b) = tokio::join!(
        queue::dequeue_priority_items(store.as_ref(), connector_id, 10, now(), &queue_config),
        queue::dequeue_priority_items(store.as_ref(), connector_id, 10, now(), &queue_config),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let a_ids: std::collections::HashSet<_> = a.iter().map(|r| r.id).collect();
    let b_ids: std::collections::HashSet<_> = b.iter().map(|r| r.id).collect();
    assert!(a_ids.is_disjoint(&b_ids));
    assert!(a.len() + b.len() <= 20);
    assert!(store.queue.lock().unwrap().is_empty());
}
