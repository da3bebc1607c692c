//! Error types for MediaPulse Core

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Agent error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Transmission errors
    #[error("Collector rejected batch: HTTP {status}")]
    CollectorStatus { status: u16 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Invalid collector endpoint: {0}")]
    InvalidEndpoint(String),

    // Persistence errors
    #[error("Offline storage error: {0}")]
    Storage(String),

    #[error("Corrupt offline record: {0}")]
    CorruptRecord(String),

    // Serialization errors
    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error is recoverable via the retry path
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::ConnectionTimeout | Error::CollectorStatus { .. }
        )
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::CollectorStatus { .. } => "COLLECTOR_STATUS",
            Error::Network(_) => "NETWORK",
            Error::ConnectionTimeout => "TIMEOUT",
            Error::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Error::Storage(_) => "STORAGE",
            Error::CorruptRecord(_) => "CORRUPT_RECORD",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
        }
    }
}
