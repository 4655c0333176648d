//! Error types for the session client.
//!
//! ERROR HANDLING
//! ==============
//! Transport drops are healed internally by reconnecting and only show up in
//! logs. What callers see are failures of correlated requests: the link
//! closed or errored before the answer arrived, the answer could not be
//! decoded, or the deadline passed.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No transport handle exists (never connected, or disconnected).
    #[error("session is not connected")]
    NotConnected,
    /// The connection closed before a matching response arrived.
    #[error("connection closed")]
    Closed,
    /// The transport reported an error before a matching response arrived.
    #[error("transport error: {0}")]
    Transport(String),
    /// Opening the transport failed.
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    /// An inbound message could not be decoded.
    #[error("inbound message decode failed: {0}")]
    Decode(String),
    /// An outbound message could not be encoded.
    #[error("outbound message encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// No matching response arrived before the request deadline.
    #[error("timed out after {0:?} waiting for response")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}
