use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The concrete action sent to the device endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Device category (e.g. `vibrate`, `light`).
    pub category: String,
    /// Action name within the category.
    pub action: String,
    /// Rendered action parameters.
    pub context: serde_json::Value,
}

impl ActionPayload {
    /// Create a payload from its parts.
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        action: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            context,
        }
    }
}

/// Lifecycle state of a [`QueueItem`].
///
/// Transitions: `Pending -> Processing -> {Success | Retrying -> Pending | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Retrying,
    Success,
    Failed,
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A queued action awaiting dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique item identifier (UUID-v4).
    pub id: String,
    /// The action to execute.
    pub payload: ActionPayload,
    /// Dispatch priority; higher values dispatch first.
    pub priority: i32,
    /// Monotonic sequence number assigned at enqueue. Breaks priority ties
    /// FIFO.
    pub seq: u64,
    /// Number of retries performed so far.
    pub retry_count: u32,
    /// When the item entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: QueueItemStatus,
    /// Message of the most recent failure, if any.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Create a pending item with the given priority and sequence number.
    #[must_use]
    pub fn new(payload: ActionPayload, priority: i32, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            priority,
            seq,
            retry_count: 0,
            enqueued_at: Utc::now(),
            status: QueueItemStatus::Pending,
            last_error: None,
        }
    }

    /// Dispatch ordering key: descending priority, then FIFO by sequence.
    #[must_use]
    pub fn order_key(&self) -> (i32, u64) {
        (-self.priority, self.seq)
    }
}
