use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bounding box: lat {lat_min}..{lat_max}, lon {lon_min}..{lon_max}")]
    InvalidBbox {
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    },

    #[error("tile size must be positive, got {0} km")]
    InvalidTileKm(f64),

    #[error("year range must satisfy start <= end, got {start}..={end}")]
    InvalidYearRange { start: i32, end: i32 },

    #[error("chunk_years must be at least 1")]
    InvalidChunkYears,

    #[error("shard index {index} out of range for {count} shards")]
    InvalidShard { index: usize, count: usize },

    #[error("riding hours must be non-empty and below 24, got {0:?}")]
    InvalidRidingHours(Vec<u32>),

    #[error("wet-day threshold must be non-negative, got {0} mm")]
    InvalidWetDayThreshold(f64),

    #[error("min_samples must be at least 1")]
    InvalidMinSamples,

    #[error("store was built with {key}={stored}, this run requests {requested}")]
    StoreMismatch {
        key: &'static str,
        stored: String,
        requested: String,
    },
}

/// Geographic extent of a grid, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Self {
        BoundingBox {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.lat_max > self.lat_min && self.lon_max > self.lon_min;
        let lat_physical = self.lat_min >= -90.0 && self.lat_max <= 90.0;
        if !ordered || !lat_physical {
            return Err(ConfigError::InvalidBbox {
                lat_min: self.lat_min,
                lat_max: self.lat_max,
                lon_min: self.lon_min,
                lon_max: self.lon_max,
            });
        }
        Ok(())
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }
}

/// Inclusive range of calendar years to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        YearRange { start, end }
    }

    /// The ten most recent complete years.
    pub fn last_decade() -> Self {
        let current = Utc::now().year();
        YearRange {
            start: current - 10,
            end: current - 1,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(ConfigError::InvalidYearRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Splits the range into date spans of at most `chunk_years` calendar
    /// years, each running Jan 1 through Dec 31.
    pub fn chunks(&self, chunk_years: u32) -> Vec<(NaiveDate, NaiveDate)> {
        let chunk = chunk_years.max(1) as i32;
        let mut out = Vec::new();
        let mut y = self.start;
        while y <= self.end {
            let y2 = (y + chunk - 1).min(self.end);
            if let (Some(d0), Some(d1)) = (
                NaiveDate::from_ymd_opt(y, 1, 1),
                NaiveDate::from_ymd_opt(y2, 12, 31),
            ) {
                out.push((d0, d1));
            }
            y = y2 + 1;
        }
        out
    }
}

/// Which tiles to keep when the grid crosses open water.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OceanPolicy {
    /// Land tiles only.
    Land,
    /// Land tiles plus sea tiles within `sea_km` of any land.
    Coastal { sea_km: f64 },
    /// Every tile, including open ocean.
    All,
}

impl OceanPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            OceanPolicy::Land => "land",
            OceanPolicy::Coastal { .. } => "coastal",
            OceanPolicy::All => "all",
        }
    }

    /// Whether applying this policy requires a land mask.
    pub fn needs_land_mask(&self) -> bool {
        !matches!(self, OceanPolicy::All)
    }
}

/// Deterministic split of the tile list across independent runs.
///
/// A tile at position `i` in the selected grid belongs to this run iff
/// `i % count == index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub index: usize,
    pub count: usize,
}

impl Default for Shard {
    fn default() -> Self {
        Shard { index: 0, count: 1 }
    }
}

impl Shard {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 || self.index >= self.count {
            return Err(ConfigError::InvalidShard {
                index: self.index,
                count: self.count,
            });
        }
        Ok(())
    }
}

/// Request pacing for the archive fetcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingSpec {
    /// Minimum delay between requests when no deadline applies.
    pub min_interval: Duration,
    /// Optional wall-clock finish target. When set, the delay is
    /// recomputed before every tile from remaining work and remaining
    /// time, and may shrink below or grow above `min_interval`.
    pub deadline: Option<DateTime<Utc>>,
}

impl Default for PacingSpec {
    fn default() -> Self {
        PacingSpec {
            min_interval: Duration::from_millis(1150),
            deadline: None,
        }
    }
}

/// Full configuration of a build run.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSpec {
    pub bbox: BoundingBox,
    pub tile_km: f64,
    pub ocean: OceanPolicy,
    /// Land-mask raster used by `Land`/`Coastal` policies. When the file
    /// is absent or unreadable the policy downgrades to `All` with a
    /// warning.
    pub land_mask: Option<PathBuf>,
    pub years: YearRange,
    /// Calendar years per archive request.
    pub chunk_years: u32,
    /// Local hours sampled for daytime temperature statistics.
    pub riding_hours: Vec<u32>,
    /// Precipitation above this counts as a wet day, mm.
    pub wet_day_mm: f64,
    /// Statistics backed by fewer samples than this are stored as null.
    pub min_samples: usize,
    pub shard: Shard,
    /// Debug cap on the number of tiles processed this run.
    pub max_tiles: Option<usize>,
    /// Reprocess tiles already marked done.
    pub force: bool,
}

impl Default for BuildSpec {
    fn default() -> Self {
        BuildSpec {
            bbox: BoundingBox::new(34.0, 72.0, -11.0, 33.0),
            tile_km: 50.0,
            ocean: OceanPolicy::Coastal { sea_km: 50.0 },
            land_mask: None,
            years: YearRange::last_decade(),
            chunk_years: 2,
            riding_hours: vec![10, 12, 14, 16],
            wet_day_mm: 0.1,
            min_samples: 2,
            shard: Shard::default(),
            max_tiles: None,
            force: false,
        }
    }
}

impl BuildSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bbox.validate()?;
        if !(self.tile_km > 0.0) {
            return Err(ConfigError::InvalidTileKm(self.tile_km));
        }
        self.years.validate()?;
        if self.chunk_years == 0 {
            return Err(ConfigError::InvalidChunkYears);
        }
        self.shard.validate()?;
        if self.riding_hours.is_empty() || self.riding_hours.iter().any(|h| *h >= 24) {
            return Err(ConfigError::InvalidRidingHours(self.riding_hours.clone()));
        }
        if !(self.wet_day_mm >= 0.0) {
            return Err(ConfigError::InvalidWetDayThreshold(self.wet_day_mm));
        }
        if self.min_samples == 0 {
            return Err(ConfigError::InvalidMinSamples);
        }
        Ok(())
    }

    /// Archive requests needed per tile: one daily plus one hourly call
    /// per year chunk.
    pub fn requests_per_tile(&self) -> usize {
        self.years.chunks(self.chunk_years).len() * 2
    }
}
