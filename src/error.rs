use thiserror::Error;

use crate::core::AlertStatus;

/// Failures talking to the message transport. Reads are retried after a
/// short backoff; publishes are logged and dropped.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel closed")]
    Closed,
}

/// A message that can never be processed. Dropped without retry.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("alert {0} not found")]
    NotFound(String),
    #[error("alert {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: AlertStatus,
        to: AlertStatus,
    },
}

impl StoreError {
    /// True for errors the operator caused rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::InvalidTransition { .. })
    }
}
