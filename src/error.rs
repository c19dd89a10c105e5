use crate::build::{ArchiveError, BuildError};
use crate::store::StoreError;
use crate::types::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClimatileError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("store holds '{stored}' data but this client reads '{expected}'")]
    ProviderMismatch {
        stored: String,
        expected: &'static str,
    },

    #[error("no such calendar day: month {month}, day {day}")]
    InvalidMonthDay { month: u32, day: u32 },
}
