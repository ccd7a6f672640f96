//! Search-registry state machine.
//!
//! Transitions of each registry row through
//! `pending -> queued -> searching -> (cooldown | exhausted | deleted)`.
//! Operations are expressed against a `SearchRegistryRepository` trait so
//! they can be unit-tested with an in-memory fake, the way a workflow
//! engine is tested against a repository trait object rather than a
//! live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backoff::{self, should_mark_exhausted};
use crate::config::BackoffConfig;
use crate::domain::{FailureCategory, RegistryState, SearchRegistryEntry, SearchType};
use crate::error::OrchestratorError;

/// Result of a single state-machine operation. Operations never corrupt
/// state on failure — all updates are single-statement, and a failed
/// operation just reports what it couldn't do.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub success: bool,
    pub previous_state: Option<RegistryState>,
    pub new_state: Option<RegistryState>,
    pub error: Option<String>,
}

impl TransitionResult {
    fn ok(previous: RegistryState, new: RegistryState) -> Self {
        Self {
            success: true,
            previous_state: Some(previous),
            new_state: Some(new),
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            previous_state: None,
            new_state: None,
            error: Some(message.into()),
        }
    }
}

/// Count of rows the cooldown sweep acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReenqueueReport {
    pub reenqueued: u64,
    pub still_cooling: u64,
}

/// Count of rows the orphan sweep recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrphanCleanupReport {
    pub recovered: u64,
}

/// Persistence seam for the registry, owned exclusively by the
/// orchestrator. A real implementation backs this with `SELECT ... FOR
/// UPDATE` / CAS-style `UPDATE ... WHERE state = $expected` statements so
/// concurrent workers can't double-claim the `queued -> searching`
/// transition.
#[async_trait]
pub trait SearchRegistryRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<SearchRegistryEntry>, OrchestratorError>;

    /// Conditionally update a row, succeeding only if its current state
    /// equals `expected_state`. Returns `false` (not an error) if another
    /// worker already moved it.
    async fn cas_update(
        &self,
        id: Uuid,
        expected_state: RegistryState,
        updated: SearchRegistryEntry,
    ) -> Result<bool, OrchestratorError>;

    /// Unconditional update, used only for manual/administrative
    /// transitions (`markExhausted`) where no race is being guarded against.
    async fn update(&self, updated: SearchRegistryEntry) -> Result<(), OrchestratorError>;

    async fn find_cooldown_eligible(
        &self,
        connector_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchRegistryEntry>, OrchestratorError>;

    async fn count_still_cooling(
        &self,
        connector_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<u64, OrchestratorError>;

    async fn find_stale_searching(
        &self,
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SearchRegistryEntry>, OrchestratorError>;

    /// IDs of registry rows for episodes sharing the same season as
    /// `entry` (joining to the episode entity to find the season, then
    /// the set of episode ids in it). Empty for movies or when the entry
    /// has no season join available.
    async fn find_season_sibling_ids(&self, entry: &SearchRegistryEntry) -> Result<Vec<Uuid>, OrchestratorError>;
}

/// Records a failed dispatch, applying backoff or backlog-tier transition.
pub async fn mark_failed(
    repo: &dyn SearchRegistryRepository,
    config: &BackoffConfig,
    registry_id: Uuid,
    category: FailureCategory,
    was_season_pack_search: bool,
    now: DateTime<Utc>,
) -> Result<TransitionResult, OrchestratorError> {
    let Some(entry) = repo.get(registry_id).await? else {
        return Ok(TransitionResult::failed("registry entry not found"));
    };
    if entry.state != RegistryState::Searching {
        return Ok(TransitionResult::failed("invalid_state"));
    }

    if was_season_pack_search && category == FailureCategory::NoResults && entry.content_type == crate::domain::ContentType::Episode {
        for sibling_id in repo.find_season_sibling_ids(&entry).await? {
            if let Some(mut sibling) = repo.get(sibling_id).await? {
                sibling.season_pack_failed = true;
                sibling.updated_at = now;
                repo.update(sibling).await?;
            }
        }
    }

    let attempt = entry.attempt_count as u32 + 1;
    let mut updated = entry.clone();
    updated.attempt_count = attempt as i32;
    updated.failure_category = Some(category);
    updated.updated_at = now;

    let new_state = if should_mark_exhausted(attempt, config) {
        if !config.backlog_enabled {
            updated.state = RegistryState::Exhausted;
            updated.next_eligible = None;
            RegistryState::Exhausted
        } else {
            let new_tier = (entry.backlog_tier as u32 + 1).min(config.backlog_max_tier);
            updated.state = RegistryState::Cooldown;
            updated.backlog_tier = new_tier as i32;
            updated.attempt_count = 0;
            updated.next_eligible = Some(backoff::backlog_tier_delay(new_tier, now, config));
            RegistryState::Cooldown
        }
    } else {
        updated.state = RegistryState::Cooldown;
        updated.next_eligible = Some(backoff::next_eligible_time(attempt, now, config));
        RegistryState::Cooldown
    };

    let applied = repo.cas_update(registry_id, RegistryState::Searching, updated).await?;
    if !applied {
        return Ok(TransitionResult::failed("concurrent modification"));
    }

    Ok(TransitionResult::ok(RegistryState::Searching, new_state))
}

/// Records a successful dispatch. Gap searches are left untouched — the
/// row is deleted by the external sync when the content lands. Upgrade
/// searches enter backlog tier 1 unconditionally when backlog is
/// enabled; when backlog is disabled the row is likewise left for
/// external sync to delete once the upgrade is confirmed, since there is
/// no cooldown tier to place it in.
pub async fn mark_search_dispatched(
    repo: &dyn SearchRegistryRepository,
    config: &BackoffConfig,
    registry_id: Uuid,
    search_type: SearchType,
    now: DateTime<Utc>,
) -> Result<TransitionResult, OrchestratorError> {
    let Some(entry) = repo.get(registry_id).await? else {
        return Ok(TransitionResult::failed("registry entry not found"));
    };
    if entry.state != RegistryState::Searching {
        return Ok(TransitionResult::failed("invalid_state"));
    }

    if search_type == SearchType::Gap || !config.backlog_enabled {
        let mut updated = entry.clone();
        updated.last_searched = Some(now);
        updated.updated_at = now;
        repo.update(updated).await?;
        return Ok(TransitionResult::ok(RegistryState::Searching, RegistryState::Searching));
    }

    let mut updated = entry.clone();
    updated.state = RegistryState::Cooldown;
    updated.backlog_tier = 1;
    updated.attempt_count = 0;
    updated.last_searched = Some(now);
    updated.next_eligible = Some(backoff::backlog_tier_delay(1, now, config));
    updated.updated_at = now;

    let applied = repo.cas_update(registry_id, RegistryState::Searching, updated).await?;
    if !applied {
        return Ok(TransitionResult::failed("concurrent modification"));
    }
    Ok(TransitionResult::ok(RegistryState::Searching, RegistryState::Cooldown))
}

/// Manual exhaustion from either `searching` or `cooldown`.
pub async fn mark_exhausted(
    repo: &dyn SearchRegistryRepository,
    registry_id: Uuid,
    now: DateTime<Utc>,
) -> Result<TransitionResult, OrchestratorError> {
    let Some(entry) = repo.get(registry_id).await? else {
        return Ok(TransitionResult::failed("registry entry not found"));
    };
    if !matches!(entry.state, RegistryState::Searching | RegistryState::Cooldown) {
        return Ok(TransitionResult::failed("invalid_state"));
    }

    let previous = entry.state;
    let mut updated = entry;
    updated.state = RegistryState::Exhausted;
    updated.next_eligible = None;
    updated.updated_at = now;
    repo.update(updated).await?;
    Ok(TransitionResult::ok(previous, RegistryState::Exhausted))
}

/// `reenqueueEligibleCooldownItems(connectorId?)`.
pub async fn reenqueue_eligible_cooldown_items(
    repo: &dyn SearchRegistryRepository,
    connector_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<ReenqueueReport, OrchestratorError> {
    let eligible = repo.find_cooldown_eligible(connector_id, now).await?;
    let reenqueued = eligible.len() as u64;
    for mut entry in eligible {
        entry.state = RegistryState::Pending;
        entry.next_eligible = None;
        entry.updated_at = now;
        repo.update(entry).await?;
    }
    let still_cooling = repo.count_still_cooling(connector_id, now).await?;
    Ok(ReenqueueReport {
        reenqueued,
        still_cooling,
    })
}

/// `cleanupOrphanedSearchingItems(maxAgeMinutes)`.
pub async fn cleanup_orphaned_searching_items(
    repo: &dyn SearchRegistryRepository,
    max_age_minutes: i64,
    now: DateTime<Utc>,
) -> Result<OrphanCleanupReport, OrchestratorError> {
    let stale = repo
        .find_stale_searching(chrono::Duration::minutes(max_age_minutes), now)
        .await?;
    let recovered = stale.len() as u64;
    for mut entry in stale {
        entry.state = RegistryState::Queued;
        entry.updated_at = now;
        repo.update(entry).await?;
    }
    Ok(OrphanCleanupReport { recovered })
}

/// CAS `queued -> searching`, the worker-side claim a dispatcher makes
/// immediately before dispatching.
pub async fn set_searching(
    repo: &dyn SearchRegistryRepository,
    registry_id: Uuid,
    now: DateTime<Utc>,
) -> Result<TransitionResult, OrchestratorError> {
    let Some(entry) = repo.get(registry_id).await? else {
        return Ok(TransitionResult::failed("registry entry not found"));
    };
    if entry.state != RegistryState::Queued {
        return Ok(TransitionResult::failed("invalid_state"));
    }
    let mut updated = entry;
    updated.state = RegistryState::Searching;
    updated.updated_at = now;
    let applied = repo.cas_update(registry_id, RegistryState::Queued, updated).await?;
    if !applied {
        return Ok(TransitionResult::failed("concurrent modification"));
    }
    Ok(TransitionResult::ok(RegistryState::Queued, RegistryState::Searching))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentType;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRepo {
        rows: Mutex<HashMap<Uuid, SearchRegistryEntry>>,
        siblings: Mutex<HashMap<Uuid, Vec<Uuid>>>,
    }

    impl FakeRepo {
        fn with_entry(entry: SearchRegistryEntry) -> Self {
            let mut rows = HashMap::new();
            rows.insert(entry.id, entry);
            Self {
                rows: Mutex::new(rows),
                siblings: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SearchRegistryRepository for FakeRepo {
        async fn get(&self, id: Uuid) -> Result<Option<SearchRegistryEntry>, OrchestratorError> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn cas_update(
            &self,
            id: Uuid,
            expected_state: RegistryState,
            updated: SearchRegistryEntry,
        ) -> Result<bool, OrchestratorError> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get(&id) {
                Some(current) if current.state == expected_state => {
                    rows.insert(id, updated);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn update(&self, updated: SearchRegistryEntry) -> Result<(), OrchestratorError> {
            self.rows.lock().unwrap().insert(updated.id, updated);
            Ok(())
        }

        async fn find_cooldown_eligible(
            &self,
            _connector_id: Option<Uuid>,
            now: DateTime<Utc>,
        ) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.state == RegistryState::Cooldown && e.next_eligible.map(|t| t <= now).unwrap_or(false))
                .cloned()
                .collect())
        }

        async fn count_still_cooling(
            &self,
            _connector_id: Option<Uuid>,
            now: DateTime<Utc>,
        ) -> Result<u64, OrchestratorError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.state == RegistryState::Cooldown && e.next_eligible.map(|t| t > now).unwrap_or(false))
                .count() as u64)
        }

        async fn find_stale_searching(
            &self,
            max_age: chrono::Duration,
            now: DateTime<Utc>,
        ) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.state == RegistryState::Searching && now - e.updated_at > max_age)
                .cloned()
                .collect())
        }

        async fn find_season_sibling_ids(&self, entry: &SearchRegistryEntry) -> Result<Vec<Uuid>, OrchestratorError> {
            Ok(self.siblings.lock().unwrap().get(&entry.id).cloned().unwrap_or_default())
        }
    }

    fn searching_entry(now: DateTime<Utc>, attempt_count: i32) -> SearchRegistryEntry {
        SearchRegistryEntry {
            id: Uuid::new_v4(),
            connector_id: Uuid::new_v4(),
            content_type: ContentType::Episode,
            content_id: Uuid::new_v4(),
            search_type: SearchType::Gap,
            state: RegistryState::Searching,
            attempt_count,
            priority: 1000,
            next_eligible: None,
            last_searched: None,
            failure_category: None,
            backlog_tier: 0,
            season_pack_failed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn mark_failed_requires_searching_state() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut entry = searching_entry(now, 0);
        entry.state = RegistryState::Pending;
        let id = entry.id;
        let repo = FakeRepo::with_entry(entry);
        let config = BackoffConfig::default();

        let result = mark_failed(&repo, &config, id, FailureCategory::NoResults, false, now)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("invalid_state"));
    }

    #[tokio::test]
    async fn mark_failed_cools_down_before_max_attempts() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entry = searching_entry(now, 2);
        let id = entry.id;
        let repo = FakeRepo::with_entry(entry);
        let config = BackoffConfig::default();

        let result = mark_failed(&repo, &config, id, FailureCategory::NoResults, false, now)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.new_state, Some(RegistryState::Cooldown));

        let updated = repo.get(id).await.unwrap().unwrap();
        assert_eq!(updated.attempt_count, 3);
        assert!(updated.next_eligible.is_some());
    }

    #[tokio::test]
    async fn s5_exhausts_at_max_attempts_backlog_disabled() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entry = searching_entry(now, 4);
        let id = entry.id;
        let repo = FakeRepo::with_entry(entry);
        let config = BackoffConfig {
            max_attempts: 5,
            backlog_enabled: false,
            ..BackoffConfig::default()
        };

        let result = mark_failed(&repo, &config, id, FailureCategory::NoResults, false, now)
            .await
            .unwrap();
        assert_eq!(result.new_state, Some(RegistryState::Exhausted));

        let updated = repo.get(id).await.unwrap().unwrap();
        assert_eq!(updated.attempt_count, 5);
        assert!(updated.next_eligible.is_none());
        assert!(updated.invariants_hold());
    }

    #[tokio::test]
    async fn backlog_enabled_resets_attempts_and_raises_tier() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entry = searching_entry(now, 4);
        let id = entry.id;
        let repo = FakeRepo::with_entry(entry);
        let config = BackoffConfig {
            max_attempts: 5,
            backlog_enabled: true,
            backlog_max_tier: 4,
            ..BackoffConfig::default()
        };

        let result = mark_failed(&repo, &config, id, FailureCategory::NoResults, false, now)
            .await
            .unwrap();
        assert_eq!(result.new_state, Some(RegistryState::Cooldown));

        let updated = repo.get(id).await.unwrap().unwrap();
        assert_eq!(updated.attempt_count, 0);
        assert_eq!(updated.backlog_tier, 1);
        assert!(updated.invariants_hold());
    }

    #[tokio::test]
    async fn season_pack_no_results_flags_siblings() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entry = searching_entry(now, 0);
        let id = entry.id;
        let sibling = searching_entry(now, 0);
        let sibling_id = sibling.id;

        let repo = FakeRepo::default();
        repo.rows.lock().unwrap().insert(id, entry);
        repo.rows.lock().unwrap().insert(sibling_id, sibling);
        repo.siblings.lock().unwrap().insert(id, vec![sibling_id]);

        let config = BackoffConfig::default();
        mark_failed(&repo, &config, id, FailureCategory::NoResults, true, now)
            .await
            .unwrap();

        let sibling_after = repo.get(sibling_id).await.unwrap().unwrap();
        assert!(sibling_after.season_pack_failed);
    }

    #[tokio::test]
    async fn reenqueue_moves_eligible_cooldown_rows_to_pending() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut eligible = searching_entry(now, 1);
        eligible.state = RegistryState::Cooldown;
        eligible.next_eligible = Some(now - chrono::Duration::minutes(1));
        let eligible_id = eligible.id;

        let mut cooling = searching_entry(now, 1);
        cooling.state = RegistryState::Cooldown;
        cooling.next_eligible = Some(now + chrono::Duration::hours(1));

        let repo = FakeRepo::default();
        repo.rows.lock().unwrap().insert(eligible_id, eligible);
        repo.rows.lock().unwrap().insert(cooling.id, cooling);

        let report = reenqueue_eligible_cooldown_items(&repo, None, now).await.unwrap();
        assert_eq!(report.reenqueued, 1);
        assert_eq!(report.still_cooling, 1);

        let moved = repo.get(eligible_id).await.unwrap().unwrap();
        assert_eq!(moved.state, RegistryState::Pending);
        assert!(moved.next_eligible.is_none());
    }

    #[tokio::test]
    async fn orphan_cleanup_reverts_stale_searching_to_queued() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut stale = searching_entry(now, 1);
        stale.updated_at = now - chrono::Duration::minutes(30);
        let stale_id = stale.id;

        let repo = FakeRepo::with_entry(stale);
        let report = cleanup_orphaned_searching_items(&repo, 10, now).await.unwrap();
        assert_eq!(report.recovered, 1);

        let updated = repo.get(stale_id).await.unwrap().unwrap();
        assert_eq!(updated.state, RegistryState::Queued);
    }

    #[tokio::test]
    async fn set_searching_cas_rejects_non_queued() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let entry = searching_entry(now, 0);
        let id = entry.id;
        let repo = FakeRepo::with_entry(entry);

        let result = set_searching(&repo, id, now).await.unwrap();
        assert!(!result.success);
    }
}
