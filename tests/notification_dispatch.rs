//! Cross-cutting exercise of the notification dispatcher wired to the
//! template aggregator through a batch flush, plus the webhook signature
//! algorithm computed the same way `WebhookSender` computes it.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use search_orchestrator::domain::{ChannelType, NotificationChannel, NotificationHistoryEntry, NotificationStatus};
use search_orchestrator::error::OrchestratorError;
use search_orchestrator::events::EventType;
use search_orchestrator::notification_dispatcher::{self, NotificationRepository, SenderResolver};
use search_orchestrator::notification_senders::{sign_webhook_payload, ChannelSender, NotificationResult};
use search_orchestrator::notification_templates::NotificationPayload;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

fn batching_channel(id: Uuid) -> NotificationChannel {
    NotificationChannel {
        id,
        name: "ops-digest".to_string(),
        channel_type: ChannelType::Webhook,
        config: serde_json::json!({"url": "https://example.test/hook"}),
        sensitive_config: serde_json::json!({}),
        enabled: true,
        enabled_events: vec!["search_exhausted".to_string()],
        batching_enabled: true,
        batching_window_seconds: 60,
        quiet_hours_enabled: false,
        quiet_hours_start: None,
        quiet_hours_end: None,
        quiet_hours_timezone: "UTC".to_string(),
    }
}

#[derive(Default)]
struct InMemoryNotificationStore {
    channels: Mutex<Vec<NotificationChannel>>,
    history: Mutex<HashMap<Uuid, NotificationHistoryEntry>>,
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationStore {
    async fn list_enabled_channels_for_event(&self, event_type: &str) -> Result<Vec<NotificationChannel>, OrchestratorError> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.enabled && c.enabled_events.iter().any(|e| e == event_type))
            .cloned()
            .collect())
    }

    async fn insert_history(&self, entry: NotificationHistoryEntry) -> Result<(), OrchestratorError> {
        self.history.lock().unwrap().insert(entry.id, entry);
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
        if let Some(entry) = self.history.lock().unwrap().get_mut(&id) {
            entry.status = status;
            entry.error = error;
            entry.sent_at = sent_at;
            entry.batch_id = batch_id;
        }
        Ok(())
    }

    async fn find_pending_older_than(&self, channel_id: Uuid, cutoff: DateTime<Utc>) -> Result<Vec<NotificationHistoryEntry>, OrchestratorError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.channel_id == channel_id && e.status == NotificationStatus::Pending && e.created_at <= cutoff)
            .cloned()
            .collect())
    }
}

struct RecordingSender {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl ChannelSender for RecordingSender {
    async fn send(&self, channel: &NotificationChannel, payload: &NotificationPayload) -> NotificationResult {
        self.sent.lock().unwrap().push(payload.message.clone());
        NotificationResult {
            success: true,
            channel_id: channel.id,
            channel_type: channel.channel_type,
            sent_at: Some(Utc::now()),
            error: None,
            status_code: Some(200),
            duration_ms: 1,
        }
    }
}

struct SingleSenderResolver<'a>(&'a RecordingSender);
impl<'a> SenderResolver for SingleSenderResolver<'a> {
    fn resolve(&self, _channel_type: ChannelType) -> &dyn ChannelSender {
        self.0
    }
}

#[tokio::test]
async fn events_batch_and_flush_as_one_digest() {
    let store = InMemoryNotificationStore::default();
    let channel_id = Uuid::new_v4();
    store.channels.lock().unwrap().push(batching_channel(channel_id));
    let sender = RecordingSender { sent: Mutex::new(Vec::new()) };
    let resolver = SingleSenderResolver(&sender);

    for title in ["Show A S01E01", "Show B S02E03", "Show C S01E05"] {
        let result = notification_dispatcher::dispatch(
            &store,
            &resolver,
            EventType::SearchExhausted,
            serde_json::json!({"title": title}),
            now(),
        )
        .await
        .unwrap();
        assert_eq!(result.deferred, 1);
        assert_eq!(result.delivered, 0);
    }

    // Nothing sent yet; everything sits as `pending` history.
    assert!(sender.sent.lock().unwrap().is_empty());
    assert_eq!(
        store
            .history
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.status == NotificationStatus::Pending)
            .count(),
        3
    );

    let channel = store.channels.lock().unwrap()[0].clone();
    let flushed = notification_dispatcher::flush_channel_batch(&store, &resolver, &channel, now() + chrono::Duration::seconds(120))
        .await
        .unwrap();

    assert_eq!(flushed, 3);
    assert_eq!(sender.sent.lock().unwrap().len(), 1, "one digest send, not three individual sends");
    let digest_message = sender.sent.lock().unwrap()[0].clone();
    assert!(digest_message.contains("Show A S01E01"));
    assert!(digest_message.contains("Show C S01E05"));

    let history = store.history.lock().unwrap();
    let batch_ids: std::collections::HashSet<_> = history.values().map(|e| e.batch_id).collect();
    assert_eq!(batch_ids.len(), 1, "every grouped entry shares one batch_id");
    assert!(history.values().all(|e| e.status == NotificationStatus::Sent));
}

/// S6: body `{"a":1}`, timestamp `"1700000000"`, secret `"s3cret"` — calls
/// the same `sign_webhook_payload` function `WebhookSender::send` uses to
/// build its `X-Signature` header, and checks it against the literal
/// expected digest from spec §8 S6.
#[test]
fn s6_webhook_signature_matches_expected_hmac() {
    let signature = sign_webhook_payload("s3cret", "1700000000", r#"{"a":1}"#).unwrap();

    assert_eq!(signature, "1698a50bc74d1ff1db85c4e0a5297c2ad9fdba245d5737cdb789e4cc6e098940");
}
