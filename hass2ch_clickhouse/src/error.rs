use std::io;

use snafu::Snafu;

/// Messages of server side failures that go away on their own.
const RETRYABLE_SERVER_MESSAGES: &[&str] = &[
    "Too many parts",
    "Memory limit",
    "DB::Exception: Timeout",
    "No space left on device",
];

const RETRYABLE_TRANSPORT_MESSAGES: &[&str] = &[
    "connection refused",
    "connection reset",
    "no route to host",
    "timed out",
    "timeout",
];

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClickHouseError {
    #[snafu(display("invalid ClickHouse url {url}: {message}"))]
    InvalidUrl { url: String, message: String },
    #[snafu(display("unsupported url scheme {scheme}, expected http or https"))]
    UnsupportedScheme { scheme: String },
    #[snafu(display("failed to build HTTP client"))]
    ClientBuild { source: reqwest::Error },
    #[snafu(display("request to ClickHouse failed"))]
    Request { source: reqwest::Error },
    #[snafu(display("query execution failed with status {status}: {message}"))]
    Response { status: u16, message: String },
    #[snafu(display("failed to encode rows"))]
    Encode { source: serde_json::Error },
}

impl ClickHouseError {
    /// Whether running the same statement again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { source } => is_retryable_transport(source),
            Self::Response { status, message } => {
                matches!(status, 500 | 502 | 503 | 504)
                    || RETRYABLE_SERVER_MESSAGES
                        .iter()
                        .any(|pattern| message.contains(pattern))
            }
            Self::InvalidUrl { .. }
            | Self::UnsupportedScheme { .. }
            | Self::ClientBuild { .. }
            | Self::Encode { .. } => false,
        }
    }
}

fn is_retryable_transport(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            if is_retryable_io(io_err.kind()) {
                return true;
            }
        }

        let message = current.to_string().to_ascii_lowercase();
        if RETRYABLE_TRANSPORT_MESSAGES
            .iter()
            .any(|pattern| message.contains(pattern))
        {
            return true;
        }

        source = current.source();
    }

    false
}

fn is_retryable_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

pub type Result<T, E = ClickHouseError> = std::result::Result<T, E>;
