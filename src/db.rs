//! `Postgres`-backed repository implementations (feature `database`),
//! using raw-`sqlx::query`/`query_as` bind chains rather than the
//! `query!` compile-time macros, since this crate makes no assumption
//! about a reachable `DATABASE_URL` at build time.

#![cfg(feature = "database")]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    ApiKeyRateLimitState, ConnectorRateLimitState, NotificationChannel, NotificationHistoryEntry, NotificationStatus, RegistryState,
    SearchRegistryEntry,
};
use crate::domain::{PriorityInput, RequestQueueRow};
use crate::error::OrchestratorError;
use crate::indexer_health::IndexerHealthRepository;
use crate::notification_dispatcher::NotificationRepository;
use crate::queue::{ContentMetadataLookup, QueueRepository};
use crate::registry::SearchRegistryRepository;
use crate::throttle::{ApiKeyThrottleRepository, ThrottleRepository};

pub struct PgSearchRegistryRepository {
    pool: PgPool,
}

impl PgSearchRegistryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchRegistryRepository for PgSearchRegistryRepository {
    async fn get(&self, id: Uuid) -> Result<Option<SearchRegistryEntry>, OrchestratorError> {
        let row = sqlx::query_as::<_, SearchRegistryEntry>("SELECT * FROM search_registry WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn cas_update(&self, id: Uuid, expected_state: RegistryState, updated: SearchRegistryEntry) -> Result<bool, OrchestratorError> {
        let result = sqlx::query(
            "UPDATE search_registry SET state = $1, attempt_count = $2, priority = $3, next_eligible = $4, \
             last_searched = $5, failure_category = $6, backlog_tier = $7, season_pack_failed = $8, updated_at = $9 \
             WHERE id = $10 AND state = $11",
        )
        .bind(updated.state)
        .bind(updated.attempt_count)
        .bind(updated.priority)
        .bind(updated.next_eligible)
        .bind(updated.last_searched)
        .bind(updated.failure_category)
        .bind(updated.backlog_tier)
        .bind(updated.season_pack_failed)
        .bind(updated.updated_at)
        .bind(id)
        .bind(expected_state)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, updated: SearchRegistryEntry) -> Result<(), OrchestratorError> {
        sqlx::query(
            "UPDATE search_registry SET state = $1, attempt_count = $2, priority = $3, next_eligible = $4, \
             last_searched = $5, failure_category = $6, backlog_tier = $7, season_pack_failed = $8, updated_at = $9 \
             WHERE id = $10",
        )
        .bind(updated.state)
        .bind(updated.attempt_count)
        .bind(updated.priority)
        .bind(updated.next_eligible)
        .bind(updated.last_searched)
        .bind(updated.failure_category)
        .bind(updated.backlog_tier)
        .bind(updated.season_pack_failed)
        .bind(updated.updated_at)
        .bind(updated.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_cooldown_eligible(&self, connector_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
        let rows = sqlx::query_as::<_, SearchRegistryEntry>(
            "SELECT * FROM search_registry WHERE state = 'cooldown' AND next_eligible <= $1 \
             AND ($2::uuid IS NULL OR connector_id = $2)",
        )
        .bind(now)
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_still_cooling(&self, connector_id: Option<Uuid>, now: DateTime<Utc>) -> Result<u64, OrchestratorError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM search_registry WHERE state = 'cooldown' AND next_eligible > $1 \
             AND ($2::uuid IS NULL OR connector_id = $2)",
        )
        .bind(now)
        .bind(connector_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn find_stale_searching(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
        let cutoff = now - max_age;
        let rows = sqlx::query_as::<_, SearchRegistryEntry>("SELECT * FROM search_registry WHERE state = 'searching' AND updated_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn find_season_sibling_ids(&self, entry: &SearchRegistryEntry) -> Result<Vec<Uuid>, OrchestratorError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT sr.id FROM search_registry sr \
             JOIN episodes e ON e.id = sr.content_id \
             WHERE sr.content_type = 'episode' AND sr.id != $1 \
             AND e.season_id = (SELECT season_id FROM episodes WHERE id = $2)",
        )
        .bind(entry.id)
        .bind(entry.content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

pub struct PgQueueRepository {
    pool: PgPool,
}

impl PgQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for PgQueueRepository {
    async fn is_queue_paused(&self, connector_id: Uuid) -> Result<bool, OrchestratorError> {
        let paused: Option<bool> = sqlx::query_scalar("SELECT queue_paused FROM connectors WHERE id = $1")
            .bind(connector_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(paused.unwrap_or(false))
    }

    async fn set_queue_paused(&self, connector_id: Uuid, paused: bool) -> Result<(), OrchestratorError> {
        sqlx::query("UPDATE connectors SET queue_paused = $1 WHERE id = $2")
            .bind(paused)
            .bind(connector_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_pending_not_queued(&self, connector_id: Uuid) -> Result<Vec<SearchRegistryEntry>, OrchestratorError> {
        let rows = sqlx::query_as::<_, SearchRegistryEntry>(
            "SELECT sr.* FROM search_registry sr \
             LEFT JOIN request_queue rq ON rq.search_registry_id = sr.id \
             WHERE sr.connector_id = $1 AND sr.state = 'pending' AND rq.id IS NULL",
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_if_absent(&self, rows: &[RequestQueueRow]) -> Result<u64, OrchestratorError> {
        let mut inserted = 0u64;
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO request_queue (id, search_registry_id, connector_id, priority, scheduled_at) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (search_registry_id) DO NOTHING",
            )
            .bind(row.id)
            .bind(row.search_registry_id)
            .bind(row.connector_id)
            .bind(row.priority)
            .bind(row.scheduled_at)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn dequeue(&self, connector_id: Uuid, limit: u32, scheduled_before: DateTime<Utc>) -> Result<Vec<RequestQueueRow>, OrchestratorError> {
        let rows = sqlx::query_as::<_, RequestQueueRow>(
            "DELETE FROM request_queue WHERE id IN ( \
               SELECT id FROM request_queue \
               WHERE connector_id = $1 AND scheduled_at <= $2 \
               ORDER BY priority DESC, scheduled_at ASC \
               LIMIT $3 \
               FOR UPDATE SKIP LOCKED \
             ) RETURNING *",
        )
        .bind(connector_id)
        .bind(scheduled_before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn clear(&self, connector_id: Option<Uuid>) -> Result<Vec<Uuid>, OrchestratorError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "DELETE FROM request_queue WHERE $1::uuid IS NULL OR connector_id = $1 RETURNING search_registry_id",
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

pub struct PgThrottleRepository {
    pool: PgPool,
}

impl PgThrottleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThrottleRepository for PgThrottleRepository {
    async fn get_or_init(&self, connector_id: Uuid, now: DateTime<Utc>) -> Result<ConnectorRateLimitState, OrchestratorError> {
        if let Some(row) = sqlx::query_as::<_, ConnectorRateLimitState>("SELECT * FROM connector_rate_limit_state WHERE connector_id = $1")
            .bind(connector_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row);
        }
        let fresh = ConnectorRateLimitState::fresh(connector_id, now);
        self.save(fresh).await?;
        Ok(fresh)
    }

    async fn save(&self, state: ConnectorRateLimitState) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO connector_rate_limit_state (connector_id, paused_until, last_request_at, requests_this_minute, minute_window_start) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (connector_id) DO UPDATE SET paused_until = $2, last_request_at = $3, requests_this_minute = $4, minute_window_start = $5",
        )
        .bind(state.connector_id)
        .bind(state.paused_until)
        .bind(state.last_request_at)
        .bind(state.requests_this_minute)
        .bind(state.minute_window_start)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PgApiKeyThrottleRepository {
    pool: PgPool,
}

impl PgApiKeyThrottleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyThrottleRepository for PgApiKeyThrottleRepository {
    async fn get_or_init(&self, key_id: Uuid, now: DateTime<Utc>) -> Result<ApiKeyRateLimitState, OrchestratorError> {
        if let Some(row) = sqlx::query_as::<_, ApiKeyRateLimitState>("SELECT * FROM api_key_rate_limit_state WHERE key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row);
        }
        Ok(ApiKeyRateLimitState {
            key_id,
            requests_this_minute: 0,
            minute_window_start: now,
        })
    }

    async fn save(&self, state: ApiKeyRateLimitState) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO api_key_rate_limit_state (key_id, requests_this_minute, minute_window_start) VALUES ($1, $2, $3) \
             ON CONFLICT (key_id) DO UPDATE SET requests_this_minute = $2, minute_window_start = $3",
        )
        .bind(state.key_id)
        .bind(state.requests_this_minute)
        .bind(state.minute_window_start)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PgIndexerHealthRepository {
    pool: PgPool,
}

impl PgIndexerHealthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IndexerHealthRepository for PgIndexerHealthRepository {
    async fn upsert(&self, rows: &[crate::domain::IndexerHealth]) -> Result<(), OrchestratorError> {
        for row in rows {
            sqlx::query(
                "INSERT INTO indexer_health_cache (instance_id, indexer_id, name, enabled, is_rate_limited, rate_limit_expires_at, most_recent_failure, last_updated) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (instance_id, indexer_id) DO UPDATE SET \
                   name = $3, enabled = $4, is_rate_limited = $5, rate_limit_expires_at = $6, most_recent_failure = $7, last_updated = $8",
            )
            .bind(row.instance_id)
            .bind(row.indexer_id)
            .bind(&row.name)
            .bind(row.enabled)
            .bind(row.is_rate_limited)
            .bind(row.rate_limit_expires_at)
            .bind(&row.most_recent_failure)
            .bind(row.last_updated)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<crate::domain::IndexerHealth>, OrchestratorError> {
        let rows = sqlx::query_as::<_, crate::domain::IndexerHealth>("SELECT * FROM indexer_health_cache")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn list_enabled_channels_for_event(&self, event_type: &str) -> Result<Vec<NotificationChannel>, OrchestratorError> {
        let rows = sqlx::query_as::<_, NotificationChannel>(
            "SELECT * FROM notification_channels WHERE enabled = true AND $1 = ANY(enabled_events)",
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_history(&self, entry: NotificationHistoryEntry) -> Result<(), OrchestratorError> {
        sqlx::query(
            "INSERT INTO notification_history (id, channel_id, event_type, payload, status, batch_id, error, created_at, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(entry.id)
        .bind(entry.channel_id)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(entry.status)
        .bind(entry.batch_id)
        .bind(&entry.error)
        .bind(entry.created_at)
        .bind(entry.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_history_result(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error: Option<String>,
        sent_at: Option<DateTime<Utc>>,
        batch_id: Option<Uuid>,
    ) -> Result<(), OrchestratorError> {
        sqlx::query("UPDATE notification_history SET status = $1, error = $2, sent_at = $3, batch_id = $4 WHERE id = $5")
            .bind(status)
            .bind(error)
            .bind(sent_at)
            .bind(batch_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_pending_older_than(&self, channel_id: Uuid, cutoff: DateTime<Utc>) -> Result<Vec<NotificationHistoryEntry>, OrchestratorError> {
        let rows = sqlx::query_as::<_, NotificationHistoryEntry>(
            "SELECT * FROM notification_history WHERE channel_id = $1 AND status = 'pending' AND created_at <= $2",
        )
        .bind(channel_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Joins the content catalog to the priority inputs the enqueue step
/// needs. The exact join depends on the downstream schema
/// (series/episodes/movies tables) that lives outside this crate's
/// ownership; this implementation assumes a `content_metadata` view that
/// already exposes the fields needed per content type.
pub struct PgContentMetadataLookup {
    pool: PgPool,
}

impl PgContentMetadataLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ContentMetadataRow {
    content_date: Option<DateTime<Utc>>,
    season_number: Option<i32>,
    was_downloaded: bool,
    file_lost_at: Option<DateTime<Utc>>,
    user_priority_override: Option<i64>,
}

#[async_trait]
impl ContentMetadataLookup for PgContentMetadataLookup {
    async fn priority_input(&self, entry: &SearchRegistryEntry, _now: DateTime<Utc>) -> Result<PriorityInput, OrchestratorError> {
        let row = sqlx::query_as::<_, ContentMetadataRow>(
            "SELECT content_date, season_number, was_downloaded, file_lost_at, user_priority_override \
             FROM content_metadata WHERE content_id = $1",
        )
        .bind(entry.content_id)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or(ContentMetadataRow {
            content_date: None,
            season_number: None,
            was_downloaded: false,
            file_lost_at: None,
            user_priority_override: None,
        });

        Ok(PriorityInput {
            search_type: entry.search_type,
            content_date: row.content_date,
            discovered_at: entry.created_at,
            user_priority_override: row.user_priority_override.unwrap_or(0),
            attempt_count: entry.attempt_count,
            season_number: row.season_number,
            was_downloaded: row.was_downloaded,
            file_lost_at: row.file_lost_at,
        })
    }
}
