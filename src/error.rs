/// Error taxonomy for the loading pipeline
///
/// A failed load never poisons the coordinator: network and decode errors
/// terminate the one task they belong to, persistence errors are best-effort
/// relative to the in-memory result, and state errors indicate a programming
/// bug on the caller's side.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    /// Timeout, connection failure or a non-2xx response
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Corrupt or unsupported image bytes
    #[error("decode error: {0}")]
    Decode(String),

    /// Disk or index write failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Programming-order bug: invalid key, bad arguments
    #[error("state error: {0}")]
    State(String),
}

impl LoadError {
    pub fn network(url: &str, reason: impl ToString) -> Self {
        LoadError::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<image::ImageError> for LoadError {
    fn from(e: image::ImageError) -> Self {
        LoadError::Decode(e.to_string())
    }
}

impl From<rusqlite::Error> for LoadError {
    fn from(e: rusqlite::Error) -> Self {
        LoadError::Persistence(e.to_string())
    }
}
