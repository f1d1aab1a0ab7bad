use async_trait::async_trait;

use crate::error::ExecuteError;
use crate::item::ActionPayload;

/// Object-safe execute capability injected into the action queue.
///
/// The queue holds `Arc<dyn ActionExecutor>` and never touches connection
/// state directly; the remote client is the production implementation.
/// Implementations must surface failures to the caller rather than retrying
/// internally.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute the given action against the device endpoint.
    async fn execute(&self, payload: &ActionPayload) -> Result<serde_json::Value, ExecuteError>;
}
