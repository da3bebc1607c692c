//! Error types for MediaPulse SSAI

use thiserror::Error;

/// Result type alias for SSAI operations
pub type Result<T> = std::result::Result<T, Error>;

/// SSAI tracking error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Failed to fetch tracking metadata: {0}")]
    TrackingFetch(String),

    #[error("Failed to parse tracking response: {0}")]
    TrackingParse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl Error {
    /// Parse errors are recovered locally by skipping the malformed piece
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Error::ManifestParse(_) | Error::TrackingParse(_))
    }
}
