use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open tile store '{0}'")]
    Open(PathBuf, #[source] rusqlite::Error),

    #[error("failed to create store directory '{0}'")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("failed to initialize tile store schema")]
    Schema(#[source] rusqlite::Error),

    #[error("tile store query failed")]
    Query(#[from] rusqlite::Error),

    #[error("failed to encode metadata value for '{key}'")]
    MetaEncode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unreadable stored value for '{key}': '{value}'")]
    MetaValue { key: &'static str, value: String },

    #[error("store is missing metadata key '{0}'")]
    MetaMissing(&'static str),
}
