// src/error.rs - Failure taxonomy for backend calls
use std::time::Duration;
use thiserror::Error;

/// Everything a backend call can fail with. Cache lookups never produce one;
/// only the underlying fetch does.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

impl BackendError {
    /// Connection-level failures, as opposed to the backend answering badly.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, BackendError::Timeout { .. } | BackendError::Transport { .. })
    }
}
