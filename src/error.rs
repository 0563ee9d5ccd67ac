//! Error types for the session/transaction protocol and the audio pipeline.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Result alias used throughout the protocol core
pub type Result<T> = std::result::Result<T, NcsError>;

/// Errors surfaced by the client core
///
/// None of these are retried internally. Every workflow closes its transport
/// before handing the error back to the caller.
#[derive(Debug, Error)]
pub enum NcsError {
    /// Handshake rejected with an authorization status
    #[error("authorization failure: {status}\n{}", format_headers(.headers))]
    Authentication {
        /// HTTP status returned by the handshake
        status: u16,
        /// Response headers as (name, value) pairs
        headers: Vec<(String, String)>,
    },

    /// Handshake rejected with a server-side status (5xx)
    #[error("server error: {status}\n{}", format_headers(.headers))]
    Server {
        /// HTTP status returned by the handshake
        status: u16,
        /// Response headers as (name, value) pairs
        headers: Vec<(String, String)>,
    },

    /// Unexpected message, invalid state transition or rejected handshake
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded wait exceeded its deadline
    #[error("timed out after {0:?} waiting for a message")]
    Timeout(Duration),

    /// The remote reported `query_error`
    #[error("query error: {reason}")]
    Query {
        /// Reason supplied by the server
        reason: String,
    },

    /// Transport used before `connect` or after `close`
    #[error("transport is not connected")]
    Closed,

    /// Low-level WebSocket failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Message (de)serialization failure
    #[error("invalid message payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Capture device failure
    #[error("audio capture error: {0}")]
    Audio(String),

    /// Encoder failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Caller-supplied request data is malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl NcsError {
    /// Shorthand for [`NcsError::Protocol`]
    pub fn protocol(message: impl Into<String>) -> Self {
        NcsError::Protocol(message.into())
    }

    /// HTTP status attached to a rejected handshake, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            NcsError::Authentication { status, .. } | NcsError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

fn format_headers(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}
