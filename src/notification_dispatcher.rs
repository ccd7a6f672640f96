//! Notification dispatcher — fans a domain event out to every enabled
//! channel subscribed to it, honoring quiet hours and per-channel batching.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{NotificationChannel, NotificationHistoryEntry, NotificationStatus};
use crate::error::OrchestratorError;
use crate::events::EventType;
use crate::notification_senders::ChannelSender;
use crate::notification_templates::{self, NotificationPayload};
use crate::quiet_hours::is_in_quiet_hours;

/// Persistence seam for channel lookup and history bookkeeping.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn list_enabled_channels_for_event(&self, event_type: &str) -> Result<Vec<NotificationChannel>, OrchestratorError>;
    async fn insert_history(&self, entry: NotificationHistoryEntry) -> Result<(), OrchestratorError>;
    async fn update_history_result(
        &self,
        id: Uuid,
        status: NotificationStatus,
        error: Option<String>,
        sent_at: Option<DateTime<Utc>>,
        batch_id: Option<Uuid>,
    ) -> Result<(), OrchestratorError>;

    /// Pending entries for a channel older than the channel's batching
    /// window, grouped by the caller into digests.
    async fn find_pending_older_than(&self, channel_id: Uuid, cutoff: DateTime<Utc>) -> Result<Vec<NotificationHistoryEntry>, OrchestratorError>;
}

/// Resolves the sender implementation for a channel's type. A thin
/// indirection so the dispatcher doesn't need to match on `ChannelType`
/// itself, and tests can substitute fakes per type.
pub trait SenderResolver: Send + Sync {
    fn resolve(&self, channel_type: crate::domain::ChannelType) -> &dyn ChannelSender;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchResult {
    pub delivered: u32,
    pub deferred: u32,
    pub suppressed: u32,
    pub failed: u32,
}

enum ChannelOutcome {
    Delivered,
    Failed,
    Deferred,
    Suppressed,
}

async fn handle_channel(
    repo: &dyn NotificationRepository,
    resolver: &dyn SenderResolver,
    channel: NotificationChannel,
    payload: &NotificationPayload,
    now: DateTime<Utc>,
) -> Result<ChannelOutcome, OrchestratorError> {
    let history_id = Uuid::new_v4();

    let in_quiet_hours = channel.quiet_hours_enabled
        && is_in_quiet_hours(
            channel.quiet_hours_start.as_deref().unwrap_or(""),
            channel.quiet_hours_end.as_deref().unwrap_or(""),
            &channel.quiet_hours_timezone,
            now,
        );

    if in_quiet_hours {
        repo.insert_history(NotificationHistoryEntry {
            id: history_id,
            channel_id: channel.id,
            event_type: payload.event_type.clone(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            status: NotificationStatus::Pending,
            batch_id: None,
            error: None,
            created_at: now,
            sent_at: None,
        })
        .await?;
        return Ok(ChannelOutcome::Suppressed);
    }

    if channel.batching_enabled {
        repo.insert_history(NotificationHistoryEntry {
            id: history_id,
            channel_id: channel.id,
            event_type: payload.event_type.clone(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            status: NotificationStatus::Pending,
            batch_id: None,
            error: None,
            created_at: now,
            sent_at: None,
        })
        .await?;
        return Ok(ChannelOutcome::Deferred);
    }

    let sender = resolver.resolve(channel.channel_type);
    let result = sender.send(&channel, payload).await;

    let (status, error, sent_at) = if result.success {
        (NotificationStatus::Sent, None, result.sent_at)
    } else {
        (NotificationStatus::Failed, result.error.clone(), None)
    };

    repo.insert_history(NotificationHistoryEntry {
        id: history_id,
        channel_id: channel.id,
        event_type: payload.event_type.clone(),
        payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        status,
        batch_id: None,
        error,
        created_at: now,
        sent_at,
    })
    .await?;

    Ok(if result.success { ChannelOutcome::Delivered } else { ChannelOutcome::Failed })
}

/// Builds the payload for an event and fans it out to every enabled
/// channel. Every channel send runs concurrently; the function waits for
/// all of them before returning (structured concurrency).
pub async fn dispatch(
    repo: &dyn NotificationRepository,
    resolver: &dyn SenderResolver,
    event_type: EventType,
    event_data: Value,
    now: DateTime<Utc>,
) -> Result<DispatchResult, OrchestratorError> {
    let payload = notification_templates::build_payload(event_type, event_data, now);
    let channels = repo.list_enabled_channels_for_event(event_type.as_str()).await?;

    let outcomes = join_all(channels.into_iter().map(|channel| handle_channel(repo, resolver, channel, &payload, now))).await;

    let mut result = DispatchResult::default();
    for outcome in outcomes {
        match outcome? {
            ChannelOutcome::Delivered => result.delivered += 1,
            ChannelOutcome::Failed => result.failed += 1,
            ChannelOutcome::Deferred => result.deferred += 1,
            ChannelOutcome::Suppressed => result.suppressed += 1,
        }
    }
    Ok(result)
}

/// Batch flush (a separate periodic job): folds a channel's pending
/// history older than its batching window into one digest send per
/// `eventType`, then transitions every grouped entry with a shared
/// `batch_id`.
pub async fn flush_channel_batch(
    repo: &dyn NotificationRepository,
    resolver: &dyn SenderResolver,
    channel: &NotificationChannel,
    now: DateTime<Utc>,
) -> Result<u32, OrchestratorError> {
    let cutoff = now - chrono::Duration::seconds(channel.batching_window_seconds as i64);
    let pending = repo.find_pending_older_than(channel.id, cutoff).await?;

    let mut groups: std::collections::HashMap<String, Vec<NotificationHistoryEntry>> = std::collections::HashMap::new();
    for entry in pending {
        groups.entry(entry.event_type.clone()).or_default().push(entry);
    }

    let mut flushed = 0u32;
    for (event_type_str, entries) in groups {
        let Some(event_type) = parse_event_type(&event_type_str) else {
            continue;
        };
        let batch_id = Uuid::new_v4();
        let digest = notification_templates::aggregate(event_type, &entries, now);
        let sender = resolver.resolve(channel.channel_type);
        let result = sender.send(channel, &digest).await;
        let (status, error) = if result.success {
            (NotificationStatus::Sent, None)
        } else {
            (NotificationStatus::Failed, result.error.clone())
        };
        for entry in &entries {
            repo.update_history_result(entry.id, status, error.clone(), result.sent_at, Some(batch_id)).await?;
        }
        flushed += entries.len() as u32;
    }

    Ok(flushed)
}

fn parse_event_type(value: &str) -> Option<EventType> {
    match value {
        "sweep_started" => Some(EventType::SweepStarted),
        "sweep_completed" => Some(EventType::SweepCompleted),
        "search_success" => Some(EventType::SearchSuccess),
        "search_exhausted" => Some(EventType::SearchExhausted),
        "connector_health_changed" => Some(EventType::ConnectorHealthChanged),
        "sync_completed" => Some(EventType::SyncCompleted),
        "sync_failed" => Some(EventType::SyncFailed),
        "app_started" => Some(EventType::AppStarted),
        "update_available" => Some(EventType::UpdateAvailable),
        _ => None,
    }
}
