//! Error types for the transport layer.

/// Failures surfaced by the transport client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("authentication expired, sign in again")]
    AuthExpired,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("progress stream could not be opened: {0}")]
    StreamOpen(String),
    #[error("malformed progress event: {0}")]
    MalformedEvent(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, TransportError::AuthExpired)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Decode(err.to_string())
    }
}
