use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A rule connecting a source event pattern to a target device action.
///
/// Mappings are evaluated by the gateway for every incoming event: the
/// `source_event_type` must match, every condition must hold, and the
/// cooldown window must have elapsed before a queue item is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    /// Unique mapping identifier (UUID-v4, assigned on creation).
    pub id: String,

    /// Human-readable label shown in status output.
    #[serde(default)]
    pub name: String,

    /// Disabled mappings are never evaluated.
    pub enabled: bool,

    /// Event type this mapping reacts to (e.g. `gift`, `chat`, `follow`).
    pub source_event_type: String,

    /// Device category of the action to trigger.
    pub target_category: String,

    /// Action name within the target category.
    pub target_action: String,

    /// Template for the action context. Rendered against the event payload
    /// at trigger time; supports `{path}` placeholders and `${expr}`
    /// expressions.
    pub context_template: serde_json::Value,

    /// All conditions must pass for the mapping to fire.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Delay between the mapping firing and the enqueue, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,

    /// Minimum interval between two firings, in milliseconds.
    #[serde(default)]
    pub cooldown_ms: u64,

    /// Priority carried into the queue item (higher dispatches first).
    #[serde(default)]
    pub priority: i32,

    /// When this mapping last fired. Updated at enqueue time, before the
    /// action outcome is known, so a failed action still consumes the
    /// cooldown window (legacy behavior, kept as documented).
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Mapping {
    /// Create an enabled mapping with required fields. Generates a UUID-v4
    /// id and leaves conditions, delay, and cooldown empty.
    #[must_use]
    pub fn new(
        source_event_type: impl Into<String>,
        target_category: impl Into<String>,
        target_action: impl Into<String>,
        context_template: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: String::new(),
            enabled: true,
            source_event_type: source_event_type.into(),
            target_category: target_category.into(),
            target_action: target_action.into(),
            context_template,
            conditions: Vec::new(),
            delay_ms: 0,
            cooldown_ms: 0,
            priority: 0,
            last_triggered_at: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set the cooldown window in milliseconds.
    #[must_use]
    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Set the enqueue delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mark the mapping as disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Comparison operator used by [`Condition::Threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// Apply the operator to two numbers.
    #[must_use]
    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Self::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }
}

/// A single gate on an incoming event payload.
///
/// `field` values are dotted paths into the event payload
/// (e.g. `gift.name`). A condition that references a missing field simply
/// fails; it never errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// The string at `field` must contain `value` as a substring.
    Contains { field: String, value: String },
    /// The number at `field` must satisfy `op` against `value`.
    Threshold {
        field: String,
        op: CompareOp,
        value: f64,
    },
    /// The string at `field` must be one of `values`.
    AllowList { field: String, values: Vec<String> },
    /// The string at `field` must not be one of `values`.
    DenyList { field: String, values: Vec<String> },
    /// A boolean expression in the template grammar, evaluated against the
    /// event payload (e.g. `coins >= 100 && len(username) > 3`).
    Predicate { expr: String },
}
