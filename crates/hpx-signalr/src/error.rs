//! Error handling for the SignalR client.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the client.
pub type SignalRResult<T> = Result<T, SignalRError>;

/// Boxed error returned by application handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Comprehensive error type for all client operations.
#[derive(Error, Debug)]
pub enum SignalRError {
    /// HTTP request errors (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL construction errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The negotiate handshake failed or returned something unusable
    #[error("Negotiation failed: {message}")]
    Negotiation { message: String },

    /// A send was attempted before the connection finished initializing
    #[error("Connection not ready for sending")]
    NotReady,

    /// The server rejected an outbound invocation
    #[error("Send failed: HTTP {status}")]
    SendFailed { status: http::StatusCode },

    /// The server rejected the start confirmation
    #[error("Start failed: HTTP {status}")]
    StartFailed { status: http::StatusCode },

    /// An inbound frame could not be decoded
    #[error("Frame decode error: {message}")]
    FrameDecode { message: String },

    /// An application handler returned an error
    #[error("Handler error: {0}")]
    Handler(BoxError),

    /// The stream endpoint rejected our credentials
    #[error("Transport rejected credentials: HTTP {status}")]
    TransportAuth { status: http::StatusCode },

    /// The stream endpoint answered with an unexpected status
    #[error("Unexpected stream status: HTTP {status}")]
    StreamStatus { status: http::StatusCode },

    /// The event stream failed mid-flight
    #[error("Stream error: {message}")]
    Stream { message: String },

    /// No frame arrived within the keepalive window
    #[error("No message received for {elapsed:?}")]
    StaleConnection { elapsed: Duration },

    /// The stream failed to open too many times in a row
    #[error("Connection aborted after {failures} failed opens")]
    RepeatedOpenFailure { failures: u32 },

    /// A background send was dropped before it completed
    #[error("Background send dropped before completion")]
    BackgroundSendDropped,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Operation timed out
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl SignalRError {
    /// Create a negotiation error.
    pub fn negotiation(message: impl Into<String>) -> Self {
        Self::Negotiation {
            message: message.into(),
        }
    }

    /// Create a frame decode error.
    pub fn frame_decode(message: impl Into<String>) -> Self {
        Self::FrameDecode {
            message: message.into(),
        }
    }

    /// Create a stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Classify a non-success status returned when opening the stream.
    pub fn stream_status(status: http::StatusCode) -> Self {
        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            Self::TransportAuth { status }
        } else {
            Self::StreamStatus { status }
        }
    }

    /// Returns `true` if the server refused our credentials.
    ///
    /// Retrying with the same credentials will not help, so the client treats
    /// this as fatal for the session.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::TransportAuth { .. })
    }

    /// Returns `true` for failures the stream transport recovers from on its
    /// own by reconnecting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Stream { .. } | Self::StreamStatus { .. } | Self::Timeout { .. }
        )
    }
}
