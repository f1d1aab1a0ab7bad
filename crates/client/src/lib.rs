//! Pulsebridge remote client.
//!
//! Talks to the device endpoint over two transports: a persistent
//! newline-delimited JSON streaming channel (subscriptions, server push,
//! correlated requests) and a stateless HTTP channel (per-call POST/GET).
//! The client is the exclusive owner of the socket, its heartbeat, and its
//! reconnect timers.
//!
//! # Quick start
//!
//! ```no_run
//! use pulsebridge_client::RemoteClient;
//! use pulsebridge_core::SendChannel;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pulsebridge_client::ClientError> {
//!     let client = RemoteClient::builder()
//!         .stream_addr("127.0.0.1", 8921)
//!         .http_base_url("http://127.0.0.1:8922")
//!         .send_channel(SendChannel::Http)
//!         .build()?;
//!
//!     client.connect();
//!     client.subscribe("gift").await?;
//!
//!     let result = client
//!         .send("vibrate", "pulse", serde_json::json!({"level": 5}))
//!         .await?;
//!     println!("endpoint replied: {result}");
//!     Ok(())
//! }
//! ```

mod connection;
mod error;

pub use error::ClientError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use pulsebridge_core::{
    ActionExecutor, ActionPayload, ClientConfig, ConnectionState, ExecuteError, OutboundMessage,
    SendChannel,
};
use serde_json::Value;
use tokio::sync::{Notify, broadcast, mpsc, oneshot, watch};
use tracing::info;
use uuid::Uuid;

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A live domain event pushed by the endpoint (gift, chat, follow, ...).
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub event: String,
    pub payload: Value,
}

/// Which cached catalog section a server push replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSection {
    Categories,
    Actions,
    Events,
}

/// Resolved payload of a correlated `action:response`.
#[derive(Debug)]
pub(crate) struct ActionReply {
    pub(crate) success: bool,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
}

pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    http: reqwest::Client,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
    pub(crate) pending: DashMap<String, oneshot::Sender<ActionReply>>,
    pub(crate) events_tx: broadcast::Sender<LiveEvent>,
    catalog_tx: broadcast::Sender<CatalogSection>,
    categories: RwLock<Vec<Value>>,
    actions: RwLock<Vec<Value>>,
    events: RwLock<Vec<Value>>,
    pub(crate) want_connected: AtomicBool,
    running: AtomicBool,
    pub(crate) shutdown: Notify,
}

impl Inner {
    /// Replace the given catalog sections and notify subscribers.
    pub(crate) fn replace_catalog(
        &self,
        categories: Option<Vec<Value>>,
        actions: Option<Vec<Value>>,
        events: Option<Vec<Value>>,
    ) {
        if let Some(categories) = categories {
            *self.categories.write().expect("catalog lock poisoned") = categories;
            let _ = self.catalog_tx.send(CatalogSection::Categories);
        }
        if let Some(actions) = actions {
            *self.actions.write().expect("catalog lock poisoned") = actions;
            let _ = self.catalog_tx.send(CatalogSection::Actions);
        }
        if let Some(events) = events {
            *self.events.write().expect("catalog lock poisoned") = events;
            let _ = self.catalog_tx.send(CatalogSection::Events);
        }
    }

    /// Drop all in-flight correlations; their callers see a closed channel.
    pub(crate) fn fail_pending(&self) {
        self.pending.clear();
    }
}

/// Builder for a [`RemoteClient`].
#[derive(Debug, Default)]
pub struct RemoteClientBuilder {
    config: ClientConfig,
}

impl RemoteClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host and port of the streaming endpoint.
    #[must_use]
    pub fn stream_addr(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.stream_host = host.into();
        self.config.stream_port = port;
        self
    }

    /// Base URL of the stateless HTTP endpoint.
    #[must_use]
    pub fn http_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.http_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Which transport carries action sends.
    #[must_use]
    pub fn send_channel(mut self, channel: SendChannel) -> Self {
        self.config.send_channel = channel;
        self
    }

    /// Whether an unexpected close triggers automatic reconnection.
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Reconnect backoff parameters.
    #[must_use]
    pub fn reconnect(
        mut self,
        base: std::time::Duration,
        decay: f64,
        max: std::time::Duration,
    ) -> Self {
        self.config.reconnect_base = base;
        self.config.reconnect_decay = decay;
        self.config.reconnect_max = max;
        self
    }

    /// Interval between heartbeat probes while connected.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Timeout for correlated requests and HTTP calls.
    #[must_use]
    pub fn request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<RemoteClient, ClientError> {
        RemoteClient::new(self.config)
    }
}

/// Dual-transport client for the device endpoint.
///
/// Cloning is cheap; all clones share the one streaming connection.
#[derive(Clone)]
pub struct RemoteClient {
    inner: Arc<Inner>,
}

impl RemoteClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate().map_err(ClientError::Configuration)?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (catalog_tx, _) = broadcast::channel(16);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                http,
                state_tx,
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                pending: DashMap::new(),
                events_tx,
                catalog_tx,
                categories: RwLock::new(Vec::new()),
                actions: RwLock::new(Vec::new()),
                events: RwLock::new(Vec::new()),
                want_connected: AtomicBool::new(false),
                running: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
        })
    }

    #[must_use]
    pub fn builder() -> RemoteClientBuilder {
        RemoteClientBuilder::new()
    }

    /// Start the streaming supervisor. Idempotent; a second call while the
    /// supervisor is running is a no-op.
    pub fn connect(&self) {
        self.inner.want_connected.store(true, Ordering::Release);
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let rx = inner
                .outbound_rx
                .lock()
                .expect("outbound lock poisoned")
                .take();
            if let Some(mut rx) = rx {
                connection::supervise(&inner, &mut rx).await;
                *inner.outbound_rx.lock().expect("outbound lock poisoned") = Some(rx);
            }
            inner.running.store(false, Ordering::Release);
        });
    }

    /// Disable reconnection and close the streaming channel.
    pub fn disconnect(&self) {
        info!("disconnect requested");
        self.inner.want_connected.store(false, Ordering::Release);
        self.inner.shutdown.notify_waiters();
    }

    /// Current streaming connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch streaming connection state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to live domain events pushed by the endpoint.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<LiveEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Subscribe to catalog replacement notifications.
    #[must_use]
    pub fn subscribe_catalog(&self) -> broadcast::Receiver<CatalogSection> {
        self.inner.catalog_tx.subscribe()
    }

    /// Locally cached device category catalog.
    #[must_use]
    pub fn cached_categories(&self) -> Vec<Value> {
        self.inner
            .categories
            .read()
            .expect("catalog lock poisoned")
            .clone()
    }

    /// Locally cached action catalog.
    #[must_use]
    pub fn cached_actions(&self) -> Vec<Value> {
        self.inner
            .actions
            .read()
            .expect("catalog lock poisoned")
            .clone()
    }

    /// Locally cached event catalog.
    #[must_use]
    pub fn cached_events(&self) -> Vec<Value> {
        self.inner
            .events
            .read()
            .expect("catalog lock poisoned")
            .clone()
    }

    /// Ask the endpoint to start pushing events of the given type.
    pub async fn subscribe(&self, event_type: &str) -> Result<(), ClientError> {
        self.send_stream(OutboundMessage::Subscribe {
            event_type: event_type.to_string(),
        })
        .await
    }

    /// Ask the endpoint to stop pushing events of the given type.
    pub async fn unsubscribe(&self, event_type: &str) -> Result<(), ClientError> {
        self.send_stream(OutboundMessage::Unsubscribe {
            event_type: event_type.to_string(),
        })
        .await
    }

    /// Execute an action on the endpoint via the configured channel.
    ///
    /// Each call is independent; the client never retries internally.
    pub async fn send(
        &self,
        category: &str,
        action: &str,
        context: Value,
    ) -> Result<Value, ClientError> {
        match self.inner.config.send_channel {
            SendChannel::Http => {
                self.http_post(
                    "command",
                    &serde_json::json!({
                        "category": category,
                        "action": action,
                        "context": context,
                    }),
                )
                .await
            }
            SendChannel::Stream => {
                let reply = self
                    .request(|id| OutboundMessage::SendAction {
                        id: Some(id),
                        category: category.to_string(),
                        action: action.to_string(),
                        context,
                    })
                    .await?;
                reply_result(reply)
            }
        }
    }

    /// Pull the device category catalog and refresh the local cache.
    pub async fn get_categories(&self) -> Result<Vec<Value>, ClientError> {
        let items = self
            .pull_catalog("categories", |id| OutboundMessage::GetCategories {
                id: Some(id),
            })
            .await?;
        self.inner.replace_catalog(Some(items.clone()), None, None);
        Ok(items)
    }

    /// Pull the action catalog and refresh the local cache.
    pub async fn get_actions(&self) -> Result<Vec<Value>, ClientError> {
        let items = self
            .pull_catalog("actions", |id| OutboundMessage::GetActions { id: Some(id) })
            .await?;
        self.inner.replace_catalog(None, Some(items.clone()), None);
        Ok(items)
    }

    /// Pull the event catalog and refresh the local cache.
    pub async fn get_events(&self) -> Result<Vec<Value>, ClientError> {
        let items = self
            .pull_catalog("events", |id| OutboundMessage::GetEvents { id: Some(id) })
            .await?;
        self.inner.replace_catalog(None, None, Some(items.clone()));
        Ok(items)
    }

    /// Pull endpoint application metadata (name, version, capabilities).
    pub async fn get_app_info(&self) -> Result<Value, ClientError> {
        match self.inner.config.send_channel {
            SendChannel::Stream if self.state() == ConnectionState::Connected => {
                let reply = self
                    .request(|id| OutboundMessage::GetAppInfo { id: Some(id) })
                    .await?;
                reply_result(reply)
            }
            _ => self.http_get("app-info").await,
        }
    }

    async fn pull_catalog(
        &self,
        path: &str,
        make: impl FnOnce(String) -> OutboundMessage,
    ) -> Result<Vec<Value>, ClientError> {
        let value = match self.inner.config.send_channel {
            SendChannel::Stream if self.state() == ConnectionState::Connected => {
                let reply = self.request(make).await?;
                reply_result(reply)?
            }
            _ => self.http_get(path).await?,
        };
        serde_json::from_value(value).map_err(|e| ClientError::Deserialization(e.to_string()))
    }

    /// Fire-and-forget write on the streaming channel.
    async fn send_stream(&self, msg: OutboundMessage) -> Result<(), ClientError> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        self.inner
            .outbound_tx
            .send(msg)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Correlated request on the streaming channel.
    ///
    /// The correlation entry is resolved exactly once: either by the
    /// matching response or by the timeout guard that removes it. A late
    /// response finds no entry and is discarded by the reader.
    async fn request(
        &self,
        make: impl FnOnce(String) -> OutboundMessage,
    ) -> Result<ActionReply, ClientError> {
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);
        if self.inner.outbound_tx.send(make(id.clone())).await.is_err() {
            self.inner.pending.remove(&id);
            return Err(ClientError::NotConnected);
        }
        match tokio::time::timeout(self.inner.config.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::Transport(
                "connection closed before response".to_string(),
            )),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(ClientError::Timeout)
            }
        }
    }

    async fn http_post(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        let url = format!("{}/{path}", self.inner.config.http_base_url);
        let response = self
            .inner
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        decode_response(response).await
    }

    async fn http_get(&self, path: &str) -> Result<Value, ClientError> {
        let url = format!("{}/{path}", self.inner.config.http_base_url);
        let response = self
            .inner
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        decode_response(response).await
    }
}

async fn decode_response(response: reqwest::Response) -> Result<Value, ClientError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    if status.is_success() {
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| ClientError::Deserialization(e.to_string()))
    } else {
        let detail = String::from_utf8_lossy(&body);
        Err(ClientError::Remote(format!("HTTP {status}: {detail}")))
    }
}

fn reply_result(reply: ActionReply) -> Result<Value, ClientError> {
    if reply.success {
        Ok(reply.result.unwrap_or(Value::Null))
    } else {
        Err(ClientError::Remote(
            reply
                .error
                .unwrap_or_else(|| "unspecified remote failure".to_string()),
        ))
    }
}

#[async_trait]
impl ActionExecutor for RemoteClient {
    async fn execute(&self, payload: &ActionPayload) -> Result<Value, ExecuteError> {
        self.send(&payload.category, &payload.action, payload.context.clone())
            .await
            .map_err(Into::into)
    }
}
