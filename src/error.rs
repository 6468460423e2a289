//! Error types for the queueing and delivery pipeline.
//!
//! Broker-side failures are reported as [`QueueError`], per-channel transport
//! failures as [`ChannelError`] and fan-out outcomes as [`DeliveryError`].

use thiserror::Error;

use crate::models::notification::ChannelType;

/// Result type alias for broker operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Errors raised by producers and consumers.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// Operation attempted before `start` or after `shutdown`.
    #[error("{component} is not started")]
    NotStarted {
        /// Component that rejected the call
        component: &'static str,
    },

    /// A time-boxed broker operation did not finish in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that was guarded
        operation: &'static str,
        /// Configured budget in milliseconds
        timeout_ms: u64,
    },

    /// The broker or the client library returned an error.
    #[error("broker error during {operation}: {message}")]
    Broker {
        /// Operation that failed
        operation: &'static str,
        /// Underlying error message
        message: String,
    },

    /// A message could not be encoded or decoded.
    #[error("message serialization failed: {message}")]
    Serialization {
        /// Serializer error message
        message: String,
    },

    /// The broker negatively confirmed a publish.
    #[error("broker rejected publish to {queue}")]
    PublishRejected {
        /// Target queue
        queue: String,
    },

    /// The batch handler returned an error or panicked.
    #[error("batch handler failed: {message}")]
    Handler {
        /// Handler error message
        message: String,
    },

    /// The batch handler returned a different number of results than items.
    #[error("batch handler returned {actual} results for {expected} items")]
    ResultCountMismatch {
        /// Number of items handed to the handler
        expected: usize,
        /// Number of results returned
        actual: usize,
    },
}

impl QueueError {
    /// Creates a broker error from any displayable error.
    pub fn broker(operation: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Broker {
            operation,
            message: error.to_string(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: &'static str, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation,
            timeout_ms,
        }
    }

    /// Creates a handler error.
    pub fn handler(error: impl std::fmt::Display) -> Self {
        Self::Handler {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            message: error.to_string(),
        }
    }
}

/// Errors raised by delivery channels.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// Any transport failure, timeouts included.
    #[error("{channel} channel unreachable: {message}")]
    Unreachable {
        /// Channel that failed
        channel: ChannelType,
        /// Normalized transport error
        message: String,
    },

    /// The contact kind cannot be served by this channel.
    #[error("{channel} channel does not support contact {contact}")]
    UnsupportedContact {
        /// Channel that was asked
        channel: ChannelType,
        /// Rendered contact
        contact: String,
    },
}

impl ChannelError {
    /// Creates an unreachable error from any displayable error.
    pub fn unreachable(channel: ChannelType, error: impl std::fmt::Display) -> Self {
        Self::Unreachable {
            channel,
            message: error.to_string(),
        }
    }
}

/// Errors produced while fanning a notification out to channels.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Every contact/channel combination failed or had no supporting channel.
    #[error("no channel succeeded")]
    NoChannelSucceeded,

    /// Health was requested but no channel exposes a health check.
    #[error("no channel exposes a health check")]
    NoHealthCheckableChannels,

    /// The strategy itself errored or panicked.
    #[error("delivery strategy failed: {message}")]
    Strategy {
        /// Failure message
        message: String,
    },

    /// A channel health check failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Errors returned to an ingress by the ingest use case.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    /// The request itself is unusable; nothing was enqueued.
    #[error("invalid notification request: {message}")]
    InvalidRequest {
        /// What is wrong with the request
        message: String,
    },
}
