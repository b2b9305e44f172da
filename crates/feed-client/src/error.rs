//! Feed Error Types

use thiserror::Error;

/// Errors that can occur while fetching from a remote feed
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport-level failure (DNS, connect, TLS, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Request did not complete in time
    #[error("Timeout waiting for feed response after {0}ms")]
    Timeout(u64),

    /// Remote answered with a non-success status
    #[error("Feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body is not the expected JSON shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configured station is not present in the station list
    #[error("Station {0} not found in feed response")]
    StationNotFound(String),

    /// Feed returned no usable entries
    #[error("Feed returned no data: {0}")]
    NoData(String),

    /// Client could not be constructed
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl FeedError {
    /// Transport, timeout, status and parse failures (as opposed to a
    /// well-formed response without a usable record)
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            FeedError::Network(_)
                | FeedError::Timeout(_)
                | FeedError::Status { .. }
                | FeedError::Parse(_)
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::Parse(err.to_string())
        } else {
            FeedError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}
