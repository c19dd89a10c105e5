mod build;
mod climatology;
mod comfort;
mod error;
mod grid;
mod interpolate;
mod stats;
mod store;
mod types;

pub use error::ClimatileError;
pub use climatology::*;

pub use build::archive::{
    ArchiveSource, DailyDay, HourlySample, OpenMeteoArchive, OPEN_METEO_ARCHIVE_URL,
};
pub use build::{
    deadline_interval, ArchiveError, BuildError, RateLimiter, TileBuilder, PROVIDER_ATTRIBUTION,
    PROVIDER_NAME,
};

pub use comfort::*;
pub use interpolate::{day_at_point, SamplingMode};

pub use grid::ocean::{filter_tiles, LandMask, LandMaskError};
pub use grid::{TileGrid, KM_PER_DEG_LAT};

pub use store::{meta_keys, StoreError, TileStore};

pub use types::config::*;
pub use types::record::*;
pub use types::tile::*;
