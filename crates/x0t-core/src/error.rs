//! Error types for x0t-core
//!
//! Centralized error handling using `thiserror` for ergonomic error definitions.
//! Packet decode failures are deliberately absent: `StegoCodec::decode` reports
//! them as `None` so that decoding stays total over arbitrary bytes.

use thiserror::Error;

/// Main error type for x0t-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Master key shorter than the codec requires
    #[error("Master key too short: expected at least {required} bytes, got {actual}")]
    KeyTooShort {
        /// Actual key length
        actual: usize,
        /// Minimum required key length
        required: usize,
    },

    /// Cryptographic primitive rejected its input
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Carrier checksum does not match its contents
    #[error("Integrity check failed: stored crc {stored:08x}, computed {computed:08x}")]
    Integrity {
        /// Checksum carried in the data
        stored: u32,
        /// Checksum of the received body
        computed: u32,
    },

    /// Encoding layer could not reverse its input
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hex decoding error
    #[error("Hex decoding error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }
}
