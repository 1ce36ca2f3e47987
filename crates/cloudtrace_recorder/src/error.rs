//! Error types for recorder construction, enqueueing and uploads.

use std::fmt;
use thiserror::Error;

/// Errors raised while building a recorder, bundler or sink.
///
/// These are fatal: a constructor that returns one leaves nothing running.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The project identifier is missing or empty.
    #[error("invalid project id")]
    InvalidProjectId,
    /// Bundler thresholds are inconsistent.
    #[error("invalid bundler configuration: {0}")]
    InvalidBundler(String),
    /// Service-account credentials could not be used.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    /// Construction happened outside of a tokio runtime.
    #[error("no tokio runtime available; construct the recorder inside a runtime")]
    NoRuntime,
    /// Reading a credentials file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The HTTP client could not be built.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors returned by a [`TraceSink`](crate::sink::TraceSink) upload.
#[derive(Debug, Error, Clone)]
pub enum UploadError {
    /// Network-level failure (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),
    /// The collector answered with a non-success status.
    #[error("collector rejected upload with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// Obtaining an access token failed.
    #[error("authentication error: {0}")]
    Auth(String),
    /// Encoding the request body failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Local sink i/o failure.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::Serialization(err.to_string())
    }
}

/// Rejected enqueue. The item is handed back so the caller can fall back.
#[derive(Error)]
pub enum EnqueueError<T> {
    /// Accepting the item would exceed the total buffered-weight limit.
    #[error("bundler buffer is full")]
    Overflow(T),
    /// The item alone is heavier than the per-bundle hard limit.
    #[error("item exceeds the bundle weight limit")]
    Oversized(T),
}

impl<T> EnqueueError<T> {
    /// Returns the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            EnqueueError::Overflow(item) | EnqueueError::Oversized(item) => item,
        }
    }

    /// Returns `true` for [`EnqueueError::Overflow`].
    pub fn is_overflow(&self) -> bool {
        matches!(self, EnqueueError::Overflow(_))
    }
}

impl<T> fmt::Debug for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Overflow(_) => f.write_str("Overflow(..)"),
            EnqueueError::Oversized(_) => f.write_str("Oversized(..)"),
        }
    }
}
