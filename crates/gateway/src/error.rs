use thiserror::Error;

/// Errors surfaced by the gateway wiring and mapping registry.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration, mapping template, or predicate.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No mapping registered under the given id.
    #[error("unknown mapping: {0}")]
    UnknownMapping(String),
}
