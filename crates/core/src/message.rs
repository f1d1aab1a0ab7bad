use serde::{Deserialize, Serialize};

/// A message received on the streaming channel.
///
/// The wire format is newline-delimited JSON with a `type` discriminator.
/// Unknown types fail deserialization and are logged and dropped by the
/// client; they never tear down the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// A live domain event (gift, chat, follow, ...).
    #[serde(rename = "event")]
    Event {
        event: String,
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Unsolicited replacement of the device category catalog.
    #[serde(rename = "categories-update")]
    CategoriesUpdate { categories: Vec<serde_json::Value> },

    /// Unsolicited replacement of the action catalog.
    #[serde(rename = "actions-update")]
    ActionsUpdate { actions: Vec<serde_json::Value> },

    /// Unsolicited replacement of the event catalog.
    #[serde(rename = "events-update")]
    EventsUpdate { events: Vec<serde_json::Value> },

    /// Combined catalog update; absent sections are left untouched.
    #[serde(rename = "features-update")]
    FeaturesUpdate {
        #[serde(default)]
        categories: Option<Vec<serde_json::Value>>,
        #[serde(default)]
        actions: Option<Vec<serde_json::Value>>,
        #[serde(default)]
        events: Option<Vec<serde_json::Value>>,
    },

    /// Response to a correlated request (`get*` or `sendAction`).
    #[serde(rename = "action:response")]
    ActionResponse {
        #[serde(default)]
        id: Option<String>,
        success: bool,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Endpoint-reported error, not tied to a request.
    #[serde(rename = "error")]
    Error { message: String },

    /// Heartbeat acknowledgment.
    #[serde(rename = "pong")]
    Pong,
}

impl InboundMessage {
    /// Correlation id for request/response pairing, when present.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ActionResponse { id, .. } => id.as_deref(),
            _ => None,
        }
    }
}

/// A message sent on the streaming channel.
///
/// The `get*` and `sendAction` requests optionally carry a correlation `id`
/// so the matching `action:response` can be paired with its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "eventType")]
        event_type: String,
    },

    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "eventType")]
        event_type: String,
    },

    #[serde(rename = "getCategories")]
    GetCategories {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    #[serde(rename = "getActions")]
    GetActions {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    #[serde(rename = "getEvents")]
    GetEvents {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    #[serde(rename = "getAppInfo")]
    GetAppInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    #[serde(rename = "sendAction")]
    SendAction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        category: String,
        action: String,
        context: serde_json::Value,
    },

    #[serde(rename = "ping")]
    Ping,
}
