use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which transport carries outgoing action sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendChannel {
    /// Stateless HTTP POST per action (default).
    #[default]
    Http,
    /// Correlated `sendAction` message on the streaming channel.
    Stream,
}

/// Configuration for the [`RemoteClient`](../../client) transports.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host of the streaming endpoint.
    pub stream_host: String,
    /// Port of the streaming endpoint.
    pub stream_port: u16,
    /// Base URL of the stateless HTTP endpoint.
    pub http_base_url: String,
    /// Whether an unexpected close triggers automatic reconnection.
    pub auto_reconnect: bool,
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Multiplier applied per failed attempt.
    pub reconnect_decay: f64,
    /// Upper bound on the reconnect delay.
    pub reconnect_max: Duration,
    /// Interval between heartbeat probes while connected. No liveness
    /// within twice this interval forces a close.
    pub heartbeat_interval: Duration,
    /// Timeout applied to every correlated request and HTTP call.
    pub request_timeout: Duration,
    /// Which transport carries action sends.
    pub send_channel: SendChannel,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream_host: "127.0.0.1".to_owned(),
            stream_port: 8921,
            http_base_url: "http://127.0.0.1:8922".to_owned(),
            auto_reconnect: true,
            reconnect_base: Duration::from_millis(500),
            reconnect_decay: 2.0,
            reconnect_max: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            send_channel: SendChannel::Http,
        }
    }
}

impl ClientConfig {
    /// Validate configuration values.
    ///
    /// `reconnect_decay` must be >= 1.0 so the backoff never shrinks;
    /// intervals must be non-zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.stream_host.is_empty() {
            return Err("stream_host must not be empty".into());
        }
        if self.reconnect_decay < 1.0 {
            return Err("reconnect_decay must be >= 1.0".into());
        }
        if self.reconnect_base.is_zero() {
            return Err("reconnect_base must be non-zero".into());
        }
        if self.heartbeat_interval.is_zero() {
            return Err("heartbeat_interval must be non-zero".into());
        }
        Ok(())
    }
}

/// Configuration for the [`ActionQueue`](../../queue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of items held in the queue; enqueues beyond this are
    /// rejected with an overflow event.
    pub capacity: usize,
    /// Maximum dispatch starts per rolling second.
    pub max_rate_per_second: u32,
    /// Dispatch loop tick. Throughput is quantized by this granularity.
    pub tick_interval: Duration,
    /// Wall-clock bound on a single execute call; a timeout counts as a
    /// failure.
    pub execute_timeout: Duration,
    /// Retries before an item moves to the dead-letter set.
    pub max_retries: u32,
    /// First retry delay.
    pub retry_base: Duration,
    /// Multiplier applied per retry: `delay = base * multiplier^(n-1)`.
    pub retry_multiplier: f64,
    /// Number of samples kept for the rolling processing-time average.
    pub stats_window: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_rate_per_second: 10,
            tick_interval: Duration::from_millis(100),
            execute_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            retry_multiplier: 2.0,
            stats_window: 50,
        }
    }
}

impl QueueConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be >= 1".into());
        }
        if self.max_rate_per_second == 0 {
            return Err("max_rate_per_second must be >= 1".into());
        }
        if self.tick_interval.is_zero() {
            return Err("tick_interval must be non-zero".into());
        }
        if self.retry_multiplier < 1.0 {
            return Err("retry_multiplier must be >= 1.0".into());
        }
        if self.stats_window == 0 {
            return Err("stats_window must be >= 1".into());
        }
        Ok(())
    }
}

/// Top-level configuration consumed by the bridge wiring.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub client: ClientConfig,
    pub queue: QueueConfig,
}

impl BridgeConfig {
    /// Validate both sections.
    pub fn validate(&self) -> Result<(), String> {
        self.client.validate()?;
        self.queue.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_config_values() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.capacity, 100);
        assert_eq!(cfg.max_rate_per_second, 10);
        assert_eq!(cfg.execute_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_retries, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn default_client_config_validates() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected() {
        let cfg = QueueConfig {
            capacity: 0,
            ..QueueConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shrinking_backoff_rejected() {
        let cfg = ClientConfig {
            reconnect_decay: 0.5,
            ..ClientConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn send_channel_default_is_http() {
        assert_eq!(SendChannel::default(), SendChannel::Http);
    }

    #[test]
    fn bridge_config_validates_both_sections() {
        let mut cfg = BridgeConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.queue.retry_multiplier = 0.0;
        assert!(cfg.validate().is_err());
    }
}
