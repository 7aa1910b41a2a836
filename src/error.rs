//! Error types for the latexer-sw library.

use thiserror::Error;

use crate::worker::WorkerState;

/// Errors that can occur during cache and fetch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while reading or writing the cache directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache index could not be encoded or decoded.
    #[error("Cache index error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// A resource URL could not be resolved against the base URL.
    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A header name or value could not be represented.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A pre-cache fetch returned a non-success status.
    #[error("Bad response status {status} for {url}")]
    Status {
        /// The requested URL.
        url: String,
        /// The status code received.
        status: u16,
    },

    /// The named cache partition does not exist.
    #[error("Cache not found: {0}")]
    CacheNotFound(String),

    /// Pre-caching a resource failed, so the whole install failed.
    #[error("Install failed at {url}: {source}")]
    Install {
        /// The resource whose fetch or store failed.
        url: String,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A lifecycle operation was called in the wrong state.
    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        /// The state the operation requires.
        expected: WorkerState,
        /// The state the worker was in.
        actual: WorkerState,
    },

    /// Network fetch failed for a reason other than an HTTP client error.
    #[error("Network error: {0}")]
    Network(String),

    /// The operation needs a cargo feature this build was compiled without.
    #[error("This build was compiled without the '{0}' feature")]
    FeatureDisabled(&'static str),
}

impl Error {
    /// Returns the error that caused an install failure, or `self` otherwise.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Install { source, .. } => source.root(),
            other => other,
        }
    }
}

/// A specialized `Result` type for latexer-sw operations.
pub type Result<T> = std::result::Result<T, Error>;
