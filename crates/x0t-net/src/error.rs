//! Error types for x0t-net
//!
//! Transport failures are returned to the caller. Probes never surface these:
//! they record the message in the result instead.

use thiserror::Error;

/// Network layer error
#[derive(Error, Debug)]
pub enum NetError {
    /// Send/receive/close issued on a disconnected transport
    #[error("Transport is not connected")]
    NotConnected,

    /// Peer rejected or botched the handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Operation exceeded its deadline
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        /// Operation name (connect, handshake, read, write)
        operation: &'static str,
        /// Deadline that expired
        after_ms: u64,
    },

    /// Non-success status from an HTTP peer
    #[error("HTTP request failed with status {status}")]
    Http {
        /// Response status code
        status: u16,
    },

    /// Payload does not fit the 16-bit length prefix of one frame
    #[error("Frame payload of {len} bytes exceeds {max}")]
    FrameTooLarge {
        /// Payload length
        len: usize,
        /// Largest payload one frame carries
        max: usize,
    },

    /// Body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Configuration unusable for the requested operation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error bubbled up from the core crate
    #[error(transparent)]
    Core(#[from] x0t_core::Error),
}

/// Result type alias using [`NetError`]
pub type Result<T> = std::result::Result<T, NetError>;

impl NetError {
    /// Create a handshake error
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake(message.into())
    }

    /// Create an invalid-config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// True for deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
