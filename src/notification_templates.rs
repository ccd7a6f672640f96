//! Templates & aggregators — map one `(eventType, data)` pair to a
//! `NotificationPayload`, and fold many same-`eventType` history entries
//! into one digest payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{HealthStatus, NotificationHistoryEntry};
use crate::events::EventType;

pub const MAX_LIST_ITEMS: usize = 5;
pub const MAX_TITLE_LENGTH: usize = 40;

/// One field in a payload's key/value table (rendered by every channel
/// sender in its own way).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadField {
    pub name: String,
    pub value: String,
}

/// The channel-agnostic shape every sender renders from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<PayloadField>,
    pub color_hex: String,
    pub url: Option<String>,
    pub event_data: Value,
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LENGTH {
        title.to_string()
    } else {
        let truncated: String = title.chars().take(MAX_TITLE_LENGTH.saturating_sub(1)).collect();
        format!("{truncated}\u{2026}")
    }
}

/// Builds the per-event payload. `data` carries whatever event-specific
/// fields the caller already has in hand (registry id, connector name,
/// counts, ...) — the template's job is only to pick a title/message/color,
/// not to re-derive domain facts.
pub fn build_payload(event_type: EventType, data: Value, now: DateTime<Utc>) -> NotificationPayload {
    let (title, message, fields) = render(event_type, &data);
    NotificationPayload {
        event_type: event_type.as_str().to_string(),
        title: truncate_title(&title),
        message,
        timestamp: now,
        fields,
        color_hex: event_type.default_color_hex().to_string(),
        url: data.get("url").and_then(Value::as_str).map(str::to_string),
        event_data: data,
    }
}

fn field(name: &str, value: impl std::fmt::Display) -> PayloadField {
    PayloadField {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn str_field(data: &Value, key: &str) -> String {
    data.get(key).and_then(Value::as_str).unwrap_or("unknown").to_string()
}

fn int_field(data: &Value, key: &str) -> i64 {
    data.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn render(event_type: EventType, data: &Value) -> (String, String, Vec<PayloadField>) {
    match event_type {
        EventType::SweepStarted => (
            "Sweep started".to_string(),
            format!("A search sweep started for connector {}", str_field(data, "connector_name")),
            vec![field("connector", str_field(data, "connector_name"))],
        ),
        EventType::SweepCompleted => {
            let dispatched = int_field(data, "dispatched");
            let skipped = int_field(data, "skipped");
            (
                "Sweep completed".to_string(),
                format!("Dispatched {dispatched}, skipped {skipped}"),
                vec![field("dispatched", dispatched), field("skipped", skipped)],
            )
        }
        EventType::SearchSuccess => {
            let title = str_field(data, "title");
            (
                "Search dispatched".to_string(),
                format!("Search dispatched for {title}"),
                vec![field("title", title), field("connector", str_field(data, "connector_name"))],
            )
        }
        EventType::SearchExhausted => {
            let title = str_field(data, "title");
            (
                "Search exhausted".to_string(),
                format!("{title} gave up after {} attempts", int_field(data, "attempt_count")),
                vec![field("title", title), field("attempts", int_field(data, "attempt_count"))],
            )
        }
        EventType::ConnectorHealthChanged => {
            let from = str_field(data, "from_status");
            let to = str_field(data, "to_status");
            (
                "Connector health changed".to_string(),
                format!("{} went from {from} to {to}", str_field(data, "connector_name")),
                vec![field("from", from), field("to", to)],
            )
        }
        EventType::SyncCompleted => (
            "Sync completed".to_string(),
            format!("Sync completed for {}", str_field(data, "connector_name")),
            vec![field("connector", str_field(data, "connector_name"))],
        ),
        EventType::SyncFailed => (
            "Sync failed".to_string(),
            format!("Sync failed for {}: {}", str_field(data, "connector_name"), str_field(data, "error")),
            vec![field("connector", str_field(data, "connector_name")), field("error", str_field(data, "error"))],
        ),
        EventType::AppStarted => (
            "Orchestrator started".to_string(),
            "The search orchestrator started up".to_string(),
            vec![],
        ),
        EventType::UpdateAvailable => {
            let version = str_field(data, "version");
            (
                "Update available".to_string(),
                format!("Version {version} is available"),
                vec![field("version", version)],
            )
        }
    }
}

/// A folded set of `NotificationHistoryEntry` rows sharing one
/// `eventType`. `"and N more"` is appended once the list exceeds
/// `MAX_LIST_ITEMS`.
pub fn aggregate(event_type: EventType, entries: &[NotificationHistoryEntry], now: DateTime<Utc>) -> NotificationPayload {
    let count = entries.len();
    let titles: Vec<String> = entries
        .iter()
        .map(|entry| truncate_title(&str_field(&entry.payload, "title")))
        .take(MAX_LIST_ITEMS)
        .collect();

    let mut message = titles.join(", ");
    if count > MAX_LIST_ITEMS {
        message.push_str(&format!(", and {} more", count - MAX_LIST_ITEMS));
    }

    NotificationPayload {
        event_type: event_type.as_str().to_string(),
        title: format!("{} ({count})", humanize(event_type)),
        message,
        timestamp: now,
        fields: vec![field("count", count)],
        color_hex: event_type.default_color_hex().to_string(),
        url: None,
        event_data: Value::Array(entries.iter().map(|e| e.payload.clone()).collect()),
    }
}

fn humanize(event_type: EventType) -> &'static str {
    match event_type {
        EventType::SweepStarted => "Sweeps started",
        EventType::SweepCompleted => "Sweeps completed",
        EventType::SearchSuccess => "Searches dispatched",
        EventType::SearchExhausted => "Searches exhausted",
        EventType::ConnectorHealthChanged => "Connector health changes",
        EventType::SyncCompleted => "Syncs completed",
        EventType::SyncFailed => "Syncs failed",
        EventType::AppStarted => "Startups",
        EventType::UpdateAvailable => "Updates available",
    }
}

/// One entry in the health-change aggregation's improvement/degradation
/// split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthChange {
    pub from: HealthStatus,
    pub to: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HealthChangeSummary {
    pub improvements: Vec<HealthChange>,
    pub degradations: Vec<HealthChange>,
}

/// Classifies each health change by the `offline:0, unhealthy:1,
/// degraded:2, healthy:3` order: a higher `to` than `from` is an
/// improvement, lower is a degradation, equal is dropped (no-op change).
pub fn classify_health_changes(changes: &[HealthChange]) -> HealthChangeSummary {
    let mut summary = HealthChangeSummary::default();
    for change in changes {
        match change.to.order().cmp(&change.from.order()) {
            std::cmp::Ordering::Greater => summary.improvements.push(*change),
            std::cmp::Ordering::Less => summary.degradations.push(*change),
            std::cmp::Ordering::Equal => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn title_truncates_at_max_length() {
        let long_title = "a".repeat(100);
        let payload = build_payload(EventType::SearchSuccess, serde_json::json!({"title": long_title}), now());
        assert_eq!(payload.title.chars().count(), MAX_TITLE_LENGTH);
    }

    fn history_entry(title: &str) -> NotificationHistoryEntry {
        NotificationHistoryEntry {
            id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            event_type: "search_success".to_string(),
            payload: serde_json::json!({"title": title}),
            status: crate::domain::NotificationStatus::Pending,
            batch_id: None,
            error: None,
            created_at: now(),
            sent_at: None,
        }
    }

    #[test]
    fn aggregate_lists_up_to_max_and_summarizes_rest() {
        let entries: Vec<_> = (0..8).map(|i| history_entry(&format!("item-{i}"))).collect();
        let digest = aggregate(EventType::SearchSuccess, &entries, now());
        assert!(digest.message.contains("and 3 more"));
        assert_eq!(digest.fields[0].value, "8");
    }

    #[test]
    fn health_changes_split_by_order() {
        let changes = vec![
            HealthChange {
                from: HealthStatus::Offline,
                to: HealthStatus::Healthy,
            },
            HealthChange {
                from: HealthStatus::Healthy,
                to: HealthStatus::Degraded,
            },
            HealthChange {
                from: HealthStatus::Healthy,
                to: HealthStatus::Healthy,
            },
        ];
        let summary = classify_health_changes(&changes);
        assert_eq!(summary.improvements.len(), 1);
        assert_eq!(summary.degradations.len(), 1);
    }
}
