//! Error types for the OPC UA lifecycle controller.

use thiserror::Error;

use crate::types::{Service, StatusCode};

/// Result type alias for OPC UA operations.
pub type Result<T> = std::result::Result<T, OpcUaError>;

/// OPC UA client error types.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Transport could not establish a channel
    #[error("Connection error: {0}")]
    Connect(String),

    /// Endpoint URL rejected before any connection attempt
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// No usable session for the request
    #[error("Not connected")]
    NotConnected,

    /// Channel or session closed underneath a request
    #[error("Connection closed: {0}")]
    ConnectionClosed(StatusCode),

    /// Non-good status in a service response
    #[error("{service} failed: {status}")]
    Protocol { service: Service, status: StatusCode },

    /// Server accepted CreateSubscription but assigned id 0
    #[error("Server assigned subscription id 0")]
    ZeroSubscriptionId,

    /// Operation not allowed in the current lifecycle state
    #[error("Not allowed while {0}")]
    InvalidState(String),

    /// Node id string could not be parsed
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    /// Transport-internal failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),
}

impl OpcUaError {
    /// Create a protocol error for a service and status code.
    pub fn protocol(service: Service, status: StatusCode) -> Self {
        Self::Protocol { service, status }
    }

    /// Create a connect error with a message.
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::Connect(msg.into())
    }

    /// Check if this error indicates a connection problem.
    ///
    /// Connection problems are handled by the reconnect path and never
    /// abort the run-loop.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_)
                | Self::InvalidEndpoint(_)
                | Self::NotConnected
                | Self::ConnectionClosed(_)
                | Self::Transport(_)
        )
    }

    /// Check if this error is a non-good service result.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::ZeroSubscriptionId)
    }

    /// Status code carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Protocol { status, .. } | Self::ConnectionClosed(status) => Some(*status),
            _ => None,
        }
    }
}
