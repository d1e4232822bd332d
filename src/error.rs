//! Error types for the windowed metrics pipeline.
//!
//! Library code reports failures with these typed errors. Application-level
//! plumbing (the binary, sinks, status oracles and subscriber callbacks) works
//! with `anyhow::Result` and wraps these where needed.

use thiserror::Error;

/// Errors raised while building or operating pipeline components
#[derive(Debug, Error)]
pub enum WindowError {
    /// Windowed aggregators only publish through the snapshot queue; any
    /// pull-style access is a contract violation.
    #[error("{aggregator} does not support {operation}: windowed aggregators publish snapshots by push only")]
    UnsupportedOperation {
        aggregator: &'static str,
        operation: &'static str,
    },

    /// A required collaborator was not supplied at construction time
    #[error("missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The timing histogram could not be created
    #[error("failed to create timing histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    /// The coordinator timer needs a Tokio runtime to run on
    #[error("window coordinator must be started from within a Tokio runtime")]
    NoRuntime,
}

/// Reasons an asynchronous dequeue returned without an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("dequeue was cancelled")]
    Cancelled,

    #[error("snapshot queue is closed and drained")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_operation_message() {
        let err = WindowError::UnsupportedOperation {
            aggregator: "ThroughputAggregator",
            operation: "current_snapshot",
        };
        let msg = err.to_string();
        assert!(msg.contains("ThroughputAggregator"));
        assert!(msg.contains("current_snapshot"));
    }

    #[test]
    fn test_missing_collaborator_message() {
        let err = WindowError::MissingCollaborator("status oracle");
        assert_eq!(err.to_string(), "missing required collaborator: status oracle");
    }
}
