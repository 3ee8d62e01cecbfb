//! Error types for eMS Home gateway operations

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, EmsError>;

/// Error taxonomy for the gateway client.
///
/// Nothing in this crate is fatal to the process: the connection supervisor
/// retries indefinitely, because a disconnected LAN device is an expected,
/// recoverable condition. Only [`EmsError::Auth`] during session setup is
/// surfaced to the caller.
#[derive(Error, Debug)]
pub enum EmsError {
    /// Credentials rejected by the device (user-actionable)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network/transport failure (always retried via backoff)
    #[error("connection error: {0}")]
    Connect(String),

    /// Unexpected response shape from the HTTP or WebSocket handshake
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Malformed telemetry frame (frame dropped, session continues)
    #[error("frame decode error: {0}")]
    Decode(String),
}

impl EmsError {
    /// Create an authentication error
    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a connection error
    pub fn connect<S: Into<String>>(msg: S) -> Self {
        Self::Connect(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a frame decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Check if the error is retryable at the supervisor level
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmsError::Connect(_) | EmsError::Protocol(_))
    }

    /// Check if the error indicates rejected credentials
    pub fn is_auth_error(&self) -> bool {
        matches!(self, EmsError::Auth(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EmsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            // The device answered the handshake with a non-101 response
            WsError::Http(response) => {
                EmsError::Protocol(format!("websocket handshake rejected: {}", response.status()))
            }
            other => EmsError::Connect(other.to_string()),
        }
    }
}

impl From<prost::DecodeError> for EmsError {
    fn from(err: prost::DecodeError) -> Self {
        EmsError::Decode(err.to_string())
    }
}

impl From<base64::DecodeError> for EmsError {
    fn from(err: base64::DecodeError) -> Self {
        EmsError::Decode(format!("invalid base64 text frame: {err}"))
    }
}
