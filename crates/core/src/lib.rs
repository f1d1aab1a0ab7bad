pub mod config;
pub mod error;
pub mod executor;
pub mod item;
pub mod mapping;
pub mod message;
pub mod status;

pub use config::{BridgeConfig, ClientConfig, QueueConfig, SendChannel};
pub use error::ExecuteError;
pub use executor::ActionExecutor;
pub use item::{ActionPayload, QueueItem, QueueItemStatus};
pub use mapping::{CompareOp, Condition, Mapping};
pub use message::{InboundMessage, OutboundMessage};
pub use status::{ConnectionState, QueueEvent, QueueStats, StatusSnapshot};
