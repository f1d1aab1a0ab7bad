use serde::{Deserialize, Serialize};

use crate::item::QueueItem;

/// Lifecycle state of the persistent streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not attempting to connect.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The streaming channel is open.
    Connected,
    /// An unexpected close occurred; waiting out the backoff interval.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}

/// Discrete queue event pushed to subscribers, carrying the affected item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// An item was accepted into the queue.
    Enqueued { item: QueueItem },
    /// An item completed successfully.
    Success { item: QueueItem },
    /// An item exhausted its retries and moved to the dead-letter set.
    Failed { item: QueueItem },
    /// An item failed and will re-enter the queue after backoff.
    Retry { item: QueueItem },
    /// The queue was at capacity and rejected the item.
    Overflow { item: QueueItem },
}

impl QueueEvent {
    /// The item this event concerns.
    #[must_use]
    pub fn item(&self) -> &QueueItem {
        match self {
            Self::Enqueued { item }
            | Self::Success { item }
            | Self::Failed { item }
            | Self::Retry { item }
            | Self::Overflow { item } => item,
        }
    }

    /// Short lowercase label for filtering and logging.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Success { .. } => "success",
            Self::Failed { .. } => "failed",
            Self::Retry { .. } => "retry",
            Self::Overflow { .. } => "overflow",
        }
    }
}

/// Incrementally maintained dispatch statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total items that completed successfully.
    pub total_success: u64,
    /// Total items that exhausted retries.
    pub total_failed: u64,
    /// Total retry attempts across all items.
    pub total_retries: u64,
    /// Rolling average execution time in milliseconds, over a bounded
    /// sample window.
    pub avg_processing_ms: f64,
    /// Dispatch starts observed in the last second.
    pub current_rate: f64,
}

/// Point-in-time view of the whole pipeline, pushed on every
/// state-changing operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Streaming connection state.
    pub connection_state: ConnectionState,
    /// Items currently pending or processing.
    pub queue_depth: usize,
    /// Items retained in the dead-letter set.
    pub dead_letter_depth: usize,
    /// Dispatch starts observed in the last second.
    pub current_rate: f64,
    /// Cumulative dispatch statistics.
    pub stats: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ActionPayload;

    fn item() -> QueueItem {
        QueueItem::new(
            ActionPayload::new("vibrate", "pulse", serde_json::Value::Null),
            0,
            0,
        )
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn queue_event_accessors() {
        let event = QueueEvent::Retry { item: item() };
        assert_eq!(event.label(), "retry");
        assert_eq!(event.item().payload.action, "pulse");
    }

    #[test]
    fn queue_event_tagged_serialization() {
        let event = QueueEvent::Enqueued { item: item() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "enqueued");
        assert!(json["item"]["id"].is_string());
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let snapshot = StatusSnapshot {
            connection_state: ConnectionState::Connected,
            queue_depth: 3,
            dead_letter_depth: 1,
            current_rate: 2.0,
            stats: QueueStats::default(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.connection_state, ConnectionState::Connected);
        assert_eq!(back.queue_depth, 3);
    }
}
