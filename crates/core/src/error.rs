use thiserror::Error;

/// Failure returned by an [`ActionExecutor`](crate::ActionExecutor).
///
/// Both variants are opaque, retryable failures to the queue; the split
/// exists for logging and diagnostics only. The executor must not retry
/// internally -- retry policy belongs to the queue.
#[derive(Debug, Clone, Error)]
pub enum ExecuteError {
    /// The endpoint could not be reached (refused, reset, timed out).
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint accepted the request and reported a failure.
    #[error("execution failed: {0}")]
    Execution(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ExecuteError::Transport("connection refused".into());
        assert_eq!(err.to_string(), "transport error: connection refused");

        let err = ExecuteError::Execution("unknown action".into());
        assert_eq!(err.to_string(), "execution failed: unknown action");
    }
}
