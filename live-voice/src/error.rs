//! Error types for the live voice pipeline.

use thiserror::Error;

/// Result type for live voice operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors that can occur while running a live session or its audio pipeline.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Missing or invalid session configuration. Raised before any transport activity.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Transport handshake failure or mid-session transport loss.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Malformed inbound frame.
    #[error("Protocol error: {0}")]
    MessageError(String),

    /// Operation requires an open session.
    #[error("Session not connected")]
    NotConnected,

    /// `connect()` was called while a connection is already open or opening.
    #[error("Session already {0}")]
    AlreadyConnected(&'static str),

    /// The session was closed while the operation was in flight.
    #[error("Session already closed")]
    SessionClosed,

    /// Audio payload could not be interpreted.
    #[error("Audio format error: {0}")]
    AudioFormatError(String),

    /// Microphone or speaker acquisition failure.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// Server returned an error.
    #[error("Server error: {code} - {message}")]
    ServerError {
        /// Error code from the server.
        code: String,
        /// Error message from the server.
        message: String,
    },

    /// Timeout waiting for the transport.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl RealtimeError {
    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new server error.
    pub fn server<S: Into<String>>(code: S, message: S) -> Self {
        Self::ServerError { code: code.into(), message: message.into() }
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::MessageError(msg.into())
    }

    /// Create a new audio format error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::AudioFormatError(msg.into())
    }

    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Whether this error only affects a single frame or chunk and the session can continue.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::MessageError(_) | Self::AudioFormatError(_))
    }
}
