//! Error taxonomy for a publication run.
//!
//! Every error is fatal for the run. The pipeline logs it once with the
//! failing stage and the binary maps it to an exit code.

use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error of a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid settings.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The intelligence source was unreachable or returned bad data.
    #[error("data fetch error: {0}")]
    DataFetch(#[from] FetchError),

    /// A local file could not be written.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Cribl rejected a request or was unreachable.
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Configuration(_) => 2,
            Error::DataFetch(_) => 3,
            Error::Serialization(_) => 4,
            Error::Upload(_) => 5,
        }
    }
}

/// Failure retrieving the MMDB from the intelligence source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client could not be built: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    #[error("downloaded file {} is not a valid MMDB: {reason}", path.display())]
    InvalidDatabase { path: PathBuf, reason: String },
}

/// Failure writing a local artifact.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read back {}: {reason}", path.display())]
    Database { path: PathBuf, reason: String },
}

impl SerializationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SerializationError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure publishing a lookup to Cribl.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("HTTP client could not be built: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{step} request failed: {source}")]
    Http {
        step: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step} returned HTTP {status}: {body}")]
    Status {
        step: &'static str,
        status: u16,
        body: String,
    },

    #[error("{step} returned an unexpected response: {message}")]
    InvalidResponse { step: &'static str, message: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
