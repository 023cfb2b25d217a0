//! Error types for remote evaluation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RemoteEvalError>;

#[derive(Error, Debug, Clone)]
pub enum RemoteEvalError {
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Nothing is subscribed to the subject; the evaluator process is not running
    #[error("no subscribers listening on '{0}'")]
    NoSubscribers(String),

    /// Error reported by the remote side or an unclassified transport failure
    #[error("Service error: {0}")]
    Service(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Prometheus metric error: {0}")]
    Metrics(String),
}

impl From<serde_json::Error> for RemoteEvalError {
    fn from(e: serde_json::Error) -> Self {
        RemoteEvalError::Serialization(e.to_string())
    }
}

impl From<prometheus::Error> for RemoteEvalError {
    fn from(e: prometheus::Error) -> Self {
        RemoteEvalError::Metrics(e.to_string())
    }
}
