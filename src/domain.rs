//! Shared first-class entities.
//!
//! These mirror the six entities the orchestrator operates on. Storage is
//! an external SQL database — these are plain value types plus, behind the
//! `database` feature, `sqlx::FromRow` derives for the row shapes, the way
//! a task-queue's row structs carry a
//! `#[cfg_attr(feature = "database", derive(sqlx::FromRow))]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backend connector type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum ConnectorType {
    A,
    B,
    C,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl HealthStatus {
    /// Ordering used by the health-change aggregator:
    /// `offline:0, unhealthy:1, degraded:2, healthy:3`.
    pub fn order(&self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Unhealthy => 1,
            Self::Degraded => 2,
            Self::Healthy => 3,
        }
    }
}

/// Identity of a backend connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct Connector {
    pub id: Uuid,
    pub connector_type: ConnectorType,
    pub base_url: String,
    /// `iv:tag:ciphertext` hex, as produced by the credential cipher.
    pub encrypted_api_key: String,
    pub health_status: HealthStatus,
    pub queue_paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum ContentType {
    Episode,
    Movie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum SearchType {
    Gap,
    Upgrade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum RegistryState {
    Pending,
    Queued,
    Searching,
    Cooldown,
    Exhausted,
}

/// Categories a failed dispatch can be classified into. A subset of
/// `ErrorCategory` relevant to search outcomes, plus
/// `no_results` which is domain-specific (not an HTTP failure at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "snake_case"))]
pub enum FailureCategory {
    NoResults,
    Network,
    Timeout,
    RateLimit,
    Server,
    Authentication,
    Unknown,
}

/// The unit of work tracked through the search pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct SearchRegistryEntry {
    pub id: Uuid,
    pub connector_id: Uuid,
    pub content_type: ContentType,
    pub content_id: Uuid,
    pub search_type: SearchType,
    pub state: RegistryState,
    pub attempt_count: i32,
    pub priority: i64,
    pub next_eligible: Option<DateTime<Utc>>,
    pub last_searched: Option<DateTime<Utc>>,
    pub failure_category: Option<FailureCategory>,
    pub backlog_tier: i32,
    pub season_pack_failed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchRegistryEntry {
    /// `state=cooldown ⇒ nextEligible ≠ null`; `state=exhausted ⇒
    /// nextEligible = null`.
    pub fn invariants_hold(&self) -> bool {
        match self.state {
            RegistryState::Cooldown => self.next_eligible.is_some(),
            RegistryState::Exhausted => self.next_eligible.is_none(),
            _ => true,
        }
    }
}

/// A materialized pending dispatch, one row per queued search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct RequestQueueRow {
    pub id: Uuid,
    pub search_registry_id: Uuid,
    pub connector_id: Uuid,
    pub priority: i64,
    pub scheduled_at: DateTime<Utc>,
}

/// Per-connector rate-limit state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct ConnectorRateLimitState {
    pub connector_id: Uuid,
    pub paused_until: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
    pub requests_this_minute: i32,
    pub minute_window_start: DateTime<Utc>,
}

impl ConnectorRateLimitState {
    pub fn fresh(connector_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            connector_id,
            paused_until: None,
            last_request_at: None,
            requests_this_minute: 0,
            minute_window_start: now,
        }
    }
}

/// Per-API-key inbound metering state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct ApiKeyRateLimitState {
    pub key_id: Uuid,
    pub requests_this_minute: i32,
    pub minute_window_start: DateTime<Utc>,
}

/// Season-level statistics used by the episode batcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeasonStatistics {
    pub total_episodes: i64,
    pub downloaded_episodes: i64,
    pub next_airing: Option<DateTime<Utc>>,
}

impl SeasonStatistics {
    pub fn missing_count(&self) -> i64 {
        (self.total_episodes - self.downloaded_episodes).max(0)
    }

    /// `missingPercent = 0` when `totalEpisodes ≤ 0`.
    pub fn missing_percent(&self) -> f64 {
        if self.total_episodes <= 0 {
            return 0.0;
        }
        (self.missing_count() as f64 / self.total_episodes as f64) * 100.0
    }
}

/// Inputs to the priority calculator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityInput {
    pub search_type: SearchType,
    pub content_date: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub user_priority_override: i64,
    pub attempt_count: i32,
    pub season_number: Option<i32>,
    pub was_downloaded: bool,
    pub file_lost_at: Option<DateTime<Utc>>,
}

/// IndexerHealth cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct IndexerHealth {
    pub instance_id: Uuid,
    pub indexer_id: i64,
    pub name: String,
    pub enabled: bool,
    pub is_rate_limited: bool,
    pub rate_limit_expires_at: Option<DateTime<Utc>>,
    pub most_recent_failure: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl IndexerHealth {
    pub fn is_stale(&self, now: DateTime<Utc>, stale_threshold: chrono::Duration) -> bool {
        now - self.last_updated > stale_threshold
    }
}

/// Notification channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "lowercase"))]
pub enum ChannelType {
    Webhook,
    ChatA,
    ChatB,
    ChatC,
    Email,
}

/// A configured notification destination.
/// `sensitive_config` is stored as an opaque, already-encrypted JSON blob —
/// the core never inspects it beyond handing it to the matching sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct NotificationChannel {
    pub id: Uuid,
    pub name: String,
    pub channel_type: ChannelType,
    pub config: serde_json::Value,
    pub sensitive_config: serde_json::Value,
    pub enabled: bool,
    pub enabled_events: Vec<String>,
    pub batching_enabled: bool,
    pub batching_window_seconds: u32,
    pub quiet_hours_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub quiet_hours_timezone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "database", derive(sqlx::Type))]
#[cfg_attr(feature = "database", sqlx(type_name = "text", rename_all = "snake_case"))]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// One delivery attempt (or deferred attempt) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(sqlx::FromRow))]
pub struct NotificationHistoryEntry {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: NotificationStatus,
    pub batch_id: Option<Uuid>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}
