//! Error taxonomy for the rollup job.
//!
//! Connection, query and sink failures are kept as distinct types so the
//! caller can tell "sink unreachable" apart from "bad query or permissions"
//! and from "report could not be delivered". Nothing here retries.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to acquire a connection to the data sink.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Data sink unreachable at {target}: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("Credentials rejected by {target}: {reason}")]
    AuthRejected { target: String, reason: String },

    #[error("Connecting to {target} timed out after {}s", .after.as_secs())]
    Timeout { target: String, after: Duration },

    #[error("Connection to {target} cancelled")]
    Cancelled { target: String },

    #[error("Invalid database configuration: {0}")]
    InvalidConfig(String),
}

/// Failure while executing a rollup query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Malformed query for {rollup}: {reason}")]
    Malformed { rollup: String, reason: String },

    #[error("Permission denied running {rollup}: {reason}")]
    PermissionDenied { rollup: String, reason: String },

    #[error("Query for {rollup} timed out after {}s", .after.as_secs())]
    Timeout { rollup: String, after: Duration },

    #[error("Query for {rollup} cancelled before completion")]
    Cancelled { rollup: String },

    #[error("Query for {rollup} failed: {source}")]
    Execution {
        rollup: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Failure to deliver a report to its sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write report to {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write report to stdout: {0}")]
    Console(#[source] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to encode CSV report: {0}")]
    Csv(#[from] csv::Error),

    #[error("Webhook delivery to {url} failed: {reason}")]
    Delivery { url: String, reason: String },
}

/// Either half of a job run failing.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl QueryError {
    /// True for timeouts and cancellations, which a scheduler may retry.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, QueryError::Timeout { .. } | QueryError::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_messages_report_seconds() {
        let err = QueryError::Timeout {
            rollup: "peak-concurrency".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "Query for peak-concurrency timed out after 30s"
        );

        let err = ConnectionError::Timeout {
            target: "mysql://db:3306/avd_ops".to_string(),
            after: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("after 5s"));
    }

    #[test]
    fn test_is_interrupted() {
        let cancelled = QueryError::Cancelled {
            rollup: "mount-failures".to_string(),
        };
        assert!(cancelled.is_interrupted());

        let malformed = QueryError::Malformed {
            rollup: "mount-failures".to_string(),
            reason: "syntax".to_string(),
        };
        assert!(!malformed.is_interrupted());
    }

    #[test]
    fn test_job_error_is_transparent() {
        let err: JobError = ConnectionError::InvalidConfig("missing path".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Invalid database configuration: missing path"
        );
    }
}
