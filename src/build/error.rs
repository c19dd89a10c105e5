use thiserror::Error;

use crate::store::StoreError;
use crate::types::config::ConfigError;

/// Errors from talking to the historical weather archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive request failed")]
    Network(#[from] reqwest::Error),

    #[error("archive kept returning HTTP 429 after {attempts} attempts")]
    RateLimited { attempts: usize },

    #[error("archive returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("failed to decode archive response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("archive returned malformed timestamp '{0}'")]
    Timestamp(String),
}

/// Errors that abort a build run outright.
///
/// Failures scoped to a single tile are recorded in the store instead, and
/// the run moves on to the next tile.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
