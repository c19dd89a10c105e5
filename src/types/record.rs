use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::config::{BoundingBox, YearRange};

/// Climatology for one tile on one calendar day, aggregated across years.
///
/// Every statistic is optional: a field is `None` when its backing sample
/// count fell below the configured minimum, so a thin year range produces
/// gaps instead of noise. The `samples_*` counters record how many raw
/// samples backed each family of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DayClimatology {
    /// Central temperature in °C. Median of daily means, replaced by the
    /// median of per-date daytime means when hourly coverage allows.
    pub temperature_c: Option<f64>,
    pub temp_p25: Option<f64>,
    pub temp_p75: Option<f64>,
    pub temp_std: Option<f64>,
    /// Mean precipitation over all sampled days, in mm.
    pub precipitation_mm: Option<f64>,
    /// Fraction of sampled days that were wet.
    pub rain_probability: Option<f64>,
    /// Mean precipitation over wet days only, in mm.
    pub rain_typical_mm: Option<f64>,
    /// Median wind speed in m/s.
    pub wind_speed_ms: Option<f64>,
    /// Circular mean of dominant wind directions, degrees from.
    pub wind_dir_deg: Option<f64>,
    /// Circular standard deviation in degrees, at most 180.
    pub wind_var_deg: Option<f64>,
    /// Percentiles of per-date daytime mean temperatures across years.
    pub temp_hist_p25: Option<f64>,
    pub temp_hist_p75: Option<f64>,
    /// Distribution over every riding-hour temperature sample.
    pub temp_day_median: Option<f64>,
    pub temp_day_p25: Option<f64>,
    pub temp_day_p75: Option<f64>,
    pub samples_daily: u32,
    pub samples_rain: u32,
    pub samples_wind: u32,
    pub samples_day_means: u32,
    pub samples_day_hours: u32,
}

/// Temperature distribution for one riding hour of one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidingHourClimatology {
    /// Local hour of day, e.g. 14.
    pub hour: u32,
    pub temp_median: Option<f64>,
    pub temp_p25: Option<f64>,
    pub temp_p75: Option<f64>,
    pub samples: u32,
}

/// Per-tile build progress, persisted so a re-run can resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    InProgress,
    Done,
    Error,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::InProgress => "in_progress",
            BuildStatus::Done => "done",
            BuildStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<BuildStatus> {
        match s {
            "pending" => Some(BuildStatus::Pending),
            "in_progress" => Some(BuildStatus::InProgress),
            "done" => Some(BuildStatus::Done),
            "error" => Some(BuildStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildState {
    pub status: BuildStatus,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// Counts of tile build states, reported after a run and by the status
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BuildProgress {
    pub done: usize,
    pub in_progress: usize,
    pub error: usize,
    pub pending: usize,
}

/// Outcome of one build run over the selected shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BuildSummary {
    /// Tiles in this run's shard after ocean filtering.
    pub selected: usize,
    /// Tiles fetched, aggregated and committed in this run.
    pub built: usize,
    /// Tiles skipped because a previous run already finished them.
    pub skipped: usize,
    /// Tiles that ended in the error state this run.
    pub failed: usize,
}

/// Write-once configuration snapshot stored inside the tile store.
///
/// Reopening a store for building with different geometry or years is an
/// error; the snapshot is what read clients use to reconstruct the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub provider: String,
    pub bbox: BoundingBox,
    pub years: YearRange,
    pub tile_km: f64,
    pub chunk_years: u32,
    pub riding_hours: Vec<u32>,
    /// Effective ocean policy after the land-mask capability probe, which
    /// may be a downgrade of the requested one.
    pub ocean_policy: String,
    pub attribution: String,
}
