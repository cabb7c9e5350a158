//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Operation requires {0}, which is not configured")]
    NotConfigured(&'static str),

    #[error("Unsupported artifact extension: {0:?}")]
    UnsupportedExtension(String),

    #[error("Could not classify input file from its header")]
    UnknownFileType,

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Download exceeded the {limit_bytes} byte cap")]
    DownloadTooLarge { limit_bytes: u64 },

    #[error("{tool} exited with status {code}: {stderr}")]
    EncodeFailed {
        tool: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("Queue message did not parse: {0}")]
    MalformedJob(String),

    #[error("Key-value store error: {0}")]
    Kv(#[from] redis::RedisError),

    #[error("Object storage error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether a retry of the same operation could plausibly succeed.
    ///
    /// Backend I/O hiccups are transient; everything derived from the input
    /// itself is permanent and retried only by a fresh user request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kv(_) | Error::Storage(_) | Error::Http(_) | Error::Io(_)
        )
    }
}
