//! Error types and their acknowledgment classification.
//!
//! Every failure that can happen while a message is in flight ends up as a
//! [`JobError`]. The worker never inspects the variant directly; it asks for
//! the [`ErrorClass`] and settles the delivery accordingly.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Whether retrying a failed job can ever help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying the same message yields the same failure.
    Permanent,
    /// Infrastructure hiccup; the message goes back to the queue.
    Transient,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Transient => write!(f, "transient"),
        }
    }
}

/// Failure of a single analyzer run.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("unrecognized output: {0}")]
    InvalidOutput(String),

    #[error("failed to walk {path}: {message}")]
    Walk { path: PathBuf, message: String },
}

/// Failure of the persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("amqp: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("failed to encode completion event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker refused message routed to {routing_key:?}")]
    Nacked { routing_key: String },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Everything that can go wrong while a job is in flight.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("repository directory not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("analyzer {analyzer} failed: {source}")]
    Analyzer {
        analyzer: String,
        #[source]
        source: AnalyzerError,
    },

    #[error("analyzer {analyzer} timed out after {timeout:?}")]
    AnalyzerTimeout { analyzer: String, timeout: Duration },

    #[error("incomplete metrics for {repo_id}: {reason}")]
    IncompleteComposite { repo_id: String, reason: String },

    #[error("failed to persist metrics: {0}")]
    Persistence(#[source] StoreError),

    #[error("failed to publish completion: {0}")]
    Publish(#[source] BrokerError),

    #[error("broker error: {0}")]
    Broker(#[source] BrokerError),
}

impl JobError {
    /// Classification used to pick between reject and requeue.
    pub fn class(&self) -> ErrorClass {
        match self {
            JobError::MalformedPayload(_) | JobError::ArtifactNotFound(_) => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::Permanent
    }
}
