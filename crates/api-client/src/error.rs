use core_types::Timeframe;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to complete the HTTP request: {0}")]
    Request(#[from] reqwest::Error),

    #[error("No market data available: {0}")]
    DataUnavailable(String),

    #[error("The API rate limit was hit; retry on the next cycle.")]
    RateLimited,

    #[error("The API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to deserialize the API response: {0}")]
    Deserialization(String),

    #[error("Invalid data format from API: {0}")]
    InvalidData(String),
}

impl ApiError {
    /// Upstream conditions that are expected to clear by the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::DataUnavailable(_) | ApiError::RateLimited | ApiError::Request(_)
        )
    }
}

/// Failures while loading recorded bars. All of them are fatal at load time.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Playback file not found: {0}")]
    MissingFile(PathBuf),

    #[error("Failed to read playback file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed playback file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Timeframe {timeframe} has two bars at {timestamp}")]
    DuplicateTimestamp {
        timeframe: Timeframe,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    #[error("Playback has no bars for {0}")]
    Empty(String),
}
