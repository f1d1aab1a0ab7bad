use thiserror::Error;

use pulsebridge_core::ExecuteError;

/// Errors surfaced by the remote client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The streaming channel is not connected.
    #[error("not connected")]
    NotConnected,

    /// The endpoint could not be reached or the connection dropped mid-call.
    #[error("transport error: {0}")]
    Transport(String),

    /// A correlated request produced no response within the timeout.
    #[error("request timed out")]
    Timeout,

    /// The endpoint answered and reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// The endpoint answered with a body the client could not decode.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<ClientError> for ExecuteError {
    /// Collapse into the queue's retryable taxonomy: endpoint-reported
    /// failures are execution errors, everything else is transport.
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Remote(message) => ExecuteError::Execution(message),
            other => ExecuteError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_map_to_execution() {
        let err: ExecuteError = ClientError::Remote("unknown action".into()).into();
        assert!(matches!(err, ExecuteError::Execution(_)));
    }

    #[test]
    fn transport_class_maps_to_transport() {
        for err in [
            ClientError::NotConnected,
            ClientError::Timeout,
            ClientError::Transport("reset".into()),
        ] {
            let mapped: ExecuteError = err.into();
            assert!(matches!(mapped, ExecuteError::Transport(_)));
        }
    }
}
