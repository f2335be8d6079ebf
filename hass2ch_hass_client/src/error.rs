use std::time::Duration;

use snafu::Snafu;
use tokio_tungstenite::tungstenite;

/// Home Assistant client errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum HassClientError {
    /// The transport could not be established.
    #[snafu(display("failed to connect to {url}"))]
    Connect {
        url: String,
        source: tungstenite::Error,
    },
    #[snafu(display("invalid websocket url {url}"))]
    InvalidUrl {
        url: String,
        source: tungstenite::Error,
    },
    #[snafu(display("timed out connecting to {url}"))]
    ConnectTimeout { url: String },
    #[snafu(display("not connected"))]
    NotConnected,
    #[snafu(display("connection lost while waiting for a response"))]
    ConnectionLost,
    #[snafu(display("failed to send {kind} message"))]
    Send {
        kind: &'static str,
        source: tungstenite::Error,
    },
    #[snafu(display("failed to encode {kind} message"))]
    Encode {
        kind: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to decode message: {message}"))]
    Decode {
        message: String,
        source: serde_json::Error,
    },
    /// The server rejected the access token.
    #[snafu(display("authentication failed: {message}"))]
    Authentication { message: String },
    #[snafu(display("subscription {id} rejected: {code}: {message}"))]
    SubscriptionRejected {
        id: u64,
        code: String,
        message: String,
    },
    #[snafu(display("timed out after {timeout:?} waiting for subscription {id} to be acknowledged"))]
    SubscriptionTimeout { id: u64, timeout: Duration },
    #[snafu(display("{kind} failed: {code}: {message}"))]
    CommandFailed {
        kind: &'static str,
        code: String,
        message: String,
    },
    #[snafu(display("timed out after {timeout:?} waiting for {kind} response"))]
    RequestTimeout {
        kind: &'static str,
        timeout: Duration,
    },
    #[snafu(display("unexpected {received} message while waiting for {expected}"))]
    UnexpectedResponse {
        expected: &'static str,
        received: &'static str,
    },
    #[snafu(display("failed to parse {kind} result"))]
    ParseResult {
        kind: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("operation cancelled"))]
    Cancelled,
    #[snafu(display("client closed"))]
    Closed,
}

impl HassClientError {
    /// Whether this error is a transport-level failure that reconnection can recover.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::NotConnected
                | Self::ConnectionLost
                | Self::Send { .. }
        )
    }
}

pub type Result<T, E = HassClientError> = std::result::Result<T, E>;
