//! Explicitly-owned pipeline wiring: client -> engine -> queue.

use std::sync::Arc;

use pulsebridge_core::{ActionExecutor, BridgeConfig, StatusSnapshot};
use pulsebridge_client::RemoteClient;
use pulsebridge_queue::ActionQueue;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::engine::{MappingEngine, Trigger};
use crate::error::GatewayError;

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Builder for a [`Bridge`].
///
/// The executor defaults to the remote client itself; tests and embedders
/// can inject their own.
#[derive(Default)]
pub struct BridgeBuilder {
    config: BridgeConfig,
    client: Option<RemoteClient>,
    executor: Option<Arc<dyn ActionExecutor>>,
}

impl BridgeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a pre-built client instead of constructing one from the config.
    #[must_use]
    pub fn with_client(mut self, client: RemoteClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the action executor the queue dispatches through.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<Bridge, GatewayError> {
        self.config
            .validate()
            .map_err(GatewayError::Configuration)?;
        let client = match self.client {
            Some(client) => client,
            None => RemoteClient::new(self.config.client.clone())
                .map_err(|e| GatewayError::Configuration(e.to_string()))?,
        };
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(client.clone()) as Arc<dyn ActionExecutor>);
        let queue = ActionQueue::new(self.config.queue.clone(), executor);
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Bridge {
            engine: Arc::new(MappingEngine::new()),
            queue,
            client,
            status_tx,
            shutdown: Arc::new(shutdown_tx),
        })
    }
}

/// The assembled pipeline. All components are explicitly owned here; there
/// is no global state.
#[derive(Clone)]
pub struct Bridge {
    engine: Arc<MappingEngine>,
    queue: ActionQueue,
    client: RemoteClient,
    status_tx: broadcast::Sender<StatusSnapshot>,
    // A latching signal: tasks that miss the change notification still see
    // the flipped value on their next poll.
    shutdown: Arc<watch::Sender<bool>>,
}

impl Bridge {
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// The mapping registry.
    #[must_use]
    pub fn engine(&self) -> &MappingEngine {
        &self.engine
    }

    /// The action queue.
    #[must_use]
    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// The remote client.
    #[must_use]
    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    /// Connect the client and start the forwarding and status tasks.
    pub fn start(&self) {
        info!("bridge starting");
        self.client.connect();
        self.spawn_event_forwarder();
        self.spawn_status_task();
    }

    /// Stop background tasks and close the streaming channel.
    pub fn shutdown(&self) {
        info!("bridge shutting down");
        let _ = self.shutdown.send(true);
        self.client.disconnect();
    }

    /// Feed one event through the pipeline.
    ///
    /// Fire-and-forget: every outcome (no match, condition failure,
    /// cooldown, overflow) is handled internally and logged; nothing
    /// propagates back to the event source.
    pub fn process_event(&self, event_type: &str, payload: &Value) {
        let triggers = self.engine.on_event(event_type, payload);
        debug!(event_type, fired = triggers.len(), "event processed");
        for trigger in triggers {
            self.dispatch_trigger(trigger);
        }
    }

    /// Current point-in-time pipeline status.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let stats = self.queue.stats();
        StatusSnapshot {
            connection_state: self.client.state(),
            queue_depth: self.queue.depth(),
            dead_letter_depth: self.queue.dead_letter_depth(),
            current_rate: stats.current_rate,
            stats,
        }
    }

    /// Subscribe to status pushes emitted on every state-changing
    /// operation.
    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    fn dispatch_trigger(&self, trigger: Trigger) {
        if trigger.delay.is_zero() {
            self.queue.enqueue(trigger.payload, trigger.priority);
        } else {
            // The delay belongs to the already-fired trigger: disabling or
            // removing the mapping mid-delay does not cancel it.
            let queue = self.queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(trigger.delay).await;
                queue.enqueue(trigger.payload, trigger.priority);
            });
        }
    }

    fn spawn_event_forwarder(&self) {
        let bridge = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut events = bridge.client.subscribe_events();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Ok(event) => bridge.process_event(&event.event, &event.payload),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "event forwarder lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    fn spawn_status_task(&self) {
        let bridge = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut queue_events = bridge.queue.subscribe();
            let mut state = bridge.client.watch_state();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = queue_events.recv() => match event {
                        Ok(_) => {
                            let _ = bridge.status_tx.send(bridge.snapshot());
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            let _ = bridge.status_tx.send(bridge.snapshot());
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let _ = bridge.status_tx.send(bridge.snapshot());
                    }
                }
            }
        });
    }
}
