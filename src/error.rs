use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to retrieve or parse a feed document. Aborts that feed's refresh only.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed returned HTTP {0}")]
    Status(StatusCode),

    #[error("malformed feed document: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

/// Computed destination is unusable: outside the storage root, empty, or owned by another entry.
#[derive(Debug, Error)]
pub enum PathValidationError {
    #[error("path {0:?} escapes the storage root")]
    Escapes(PathBuf),

    #[error("no usable file name could be derived from {0:?}")]
    Empty(String),

    #[error("every candidate name for {0:?} belongs to another entry")]
    Taken(PathBuf),
}

/// Failure while transferring one artifact. Isolated to the entry it belongs to.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download url {0:?}")]
    InvalidUrl(String),

    #[error("refusing to fetch {0:?}: only http and https are allowed")]
    UnsupportedScheme(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {0}")]
    Status(StatusCode),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Path(#[from] PathValidationError),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Path error: {0}")]
    PathValidation(#[from] PathValidationError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
