//! Publisher error types and retryability classification
//!
//! Errors fall into three buckets that drive control flow:
//! - **Transient**: socket failures and an unreachable broker, retried with
//!   exponential backoff by both the connect and publish paths
//! - **Confirmation failures**: nacks and confirm timeouts, retried by the
//!   publish path only
//! - **Terminal**: precondition violations (not connected, disposed, empty
//!   destination) and exhausted retries, surfaced to the caller immediately

use std::time::Duration;
use thiserror::Error;

/// Errors produced while connecting to the broker or publishing events.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Socket-level I/O failure while talking to the broker.
    #[error("socket error: {0}")]
    Socket(String),

    /// The broker could not be reached at all.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// The broker negatively acknowledged a published message.
    #[error("message was nacked by the broker: {0}")]
    Nacked(String),

    /// The broker did not confirm the publish within the configured bound.
    #[error("publish confirmation timed out after {0:?}")]
    ConfirmTimeout(Duration),

    /// No open connection is available to perform the requested operation.
    #[error("no broker connection is available to perform this action")]
    NotConnected,

    /// The connection manager has been permanently shut down.
    #[error("connection manager has been disposed")]
    Disposed,

    /// All retry attempts were used up; the event is undelivered.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<PublishError>,
    },

    /// The caller abandoned the operation at a retry boundary.
    #[error("operation cancelled before completion")]
    Cancelled,

    /// The event payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The destination queue name was empty.
    #[error("destination queue name must not be empty")]
    EmptyDestination,
}

impl PublishError {
    /// Create a socket error.
    pub fn socket(message: impl Into<String>) -> Self {
        PublishError::Socket(message.into())
    }

    /// Create a broker-unreachable error.
    pub fn unreachable(message: impl Into<String>) -> Self {
        PublishError::Unreachable(message.into())
    }

    /// Create a nack error.
    pub fn nacked(message: impl Into<String>) -> Self {
        PublishError::Nacked(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        PublishError::Config(message.into())
    }

    /// Transient connectivity failure: worth retrying a connect attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Socket(_) | PublishError::Unreachable(_))
    }

    /// Failure worth retrying a publish attempt: transient connectivity plus
    /// negative or missing confirmations.
    pub fn is_retryable_publish(&self) -> bool {
        self.is_transient()
            || matches!(
                self,
                PublishError::Nacked(_) | PublishError::ConfirmTimeout(_)
            )
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err.to_string())
    }
}
