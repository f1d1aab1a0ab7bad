//! Pulsebridge gateway: mapping evaluation and pipeline wiring.
//!
//! Connects the three halves of the dispatcher: live events arriving on the
//! [`RemoteClient`](pulsebridge_client::RemoteClient) stream are evaluated
//! against registered [`Mapping`](pulsebridge_core::Mapping)s, and every
//! trigger becomes an item on the
//! [`ActionQueue`](pulsebridge_queue::ActionQueue).
//!
//! # Example
//!
//! ```no_run
//! use pulsebridge_core::{BridgeConfig, Mapping};
//! use pulsebridge_gateway::Bridge;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pulsebridge_gateway::GatewayError> {
//!     let bridge = Bridge::builder()
//!         .with_config(BridgeConfig::default())
//!         .build()?;
//!
//!     bridge.engine().register(
//!         Mapping::new(
//!             "gift",
//!             "vibrate",
//!             "pulse",
//!             json!({"level": "${min(coins / 10, 20)}", "from": "{user}"}),
//!         )
//!         .with_cooldown_ms(5_000),
//!     )?;
//!
//!     bridge.start();
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod conditions;
pub mod engine;
pub mod error;

pub use bridge::{Bridge, BridgeBuilder};
pub use engine::{MappingEngine, Trigger};
pub use error::GatewayError;
