//! Error types for the killfeed pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias for killfeed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the failed call could succeed.
    ///
    /// Only upstream failures are ever retriable.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Api(api) => api.is_retriable(),
            _ => false,
        }
    }

    /// Server-requested delay when the failure was a rate limit.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Api(ApiError::RateLimited(after)) => *after,
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::Api(ApiError::RateLimited(_)))
    }
}

/// Upstream API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Rate limited{}", .0.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimited(Option<Duration>),

    #[error("Request rejected with HTTP {status}: {message}")]
    ClientError { status: u16, message: String },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Transport failures, 5xx and 429 are worth another attempt.
    /// Other 4xx and decode failures never are.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited(_)
                | ApiError::ServerError(_)
                | ApiError::Network(_)
                | ApiError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout("Request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("Failed to connect to upstream".to_string())
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),

    #[error("Queue secret not configured. Set realtime.queue_secret or KILLFEED_QUEUE_SECRET.")]
    MissingQueueSecret,
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Kill cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cached entry {key} could not be decoded: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Entry {key} could not be encoded: {reason}")]
    Encode { key: String, reason: String },
}
