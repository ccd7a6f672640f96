//! The stable domain-event palette and the default event-type to color
//! mapping notification templates draw from.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SweepStarted,
    SweepCompleted,
    SearchSuccess,
    SearchExhausted,
    ConnectorHealthChanged,
    SyncCompleted,
    SyncFailed,
    AppStarted,
    UpdateAvailable,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SweepStarted => "sweep_started",
            Self::SweepCompleted => "sweep_completed",
            Self::SearchSuccess => "search_success",
            Self::SearchExhausted => "search_exhausted",
            Self::ConnectorHealthChanged => "connector_health_changed",
            Self::SyncCompleted => "sync_completed",
            Self::SyncFailed => "sync_failed",
            Self::AppStarted => "app_started",
            Self::UpdateAvailable => "update_available",
        }
    }

    /// Default color, as a `#rrggbb` hex string. The fallback
    /// `#7289da` is used by nothing here — every event type in the
    /// palette has its own entry — but is kept reachable for forward
    /// compatibility with channel types that accept arbitrary event data.
    pub fn default_color_hex(&self) -> &'static str {
        match self {
            Self::SweepStarted => "#3498db",
            Self::SweepCompleted => "#2ecc71",
            Self::SearchSuccess => "#27ae60",
            Self::SearchExhausted => "#e74c3c",
            Self::ConnectorHealthChanged => "#f39c12",
            Self::SyncCompleted => "#9b59b6",
            Self::SyncFailed => "#e74c3c",
            Self::AppStarted => "#1abc9c",
            Self::UpdateAvailable => "#f1c40f",
        }
    }

    pub const FALLBACK_COLOR_HEX: &'static str = "#7289da";

    /// Parses the integer form channel senders that want a numeric color
    /// (Chat-A) need, stripping the leading `#`.
    pub fn default_color_int(&self) -> u32 {
        u32::from_str_radix(self.default_color_hex().trim_start_matches('#'), 16).unwrap_or(0x7289da)
    }
}

/// Converts any `#rrggbb` hex string (not just the palette's own defaults —
/// a channel may carry a user-overridden color) to its integer form.
pub fn color_hex_to_int(hex: &str) -> u32 {
    u32::from_str_radix(hex.trim_start_matches('#'), 16).unwrap_or(0x7289da)
}
