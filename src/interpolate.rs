//! Spatial sampling of stored climatology.
//!
//! Point queries blend the four surrounding tile centers bilinearly.
//! Fractions are center-relative, so a query exactly on a tile center
//! returns that tile's record unchanged, and queries near the mesh edge
//! clamp to the records that exist. Wind direction blends on the unit
//! circle; every other statistic blends linearly. A statistic missing on
//! one side of a blend carries the other side through instead of nulling
//! the result.

use crate::grid::TileGrid;
use crate::stats;
use crate::store::{StoreError, TileStore};
use crate::types::record::DayClimatology;
use crate::types::tile::{tile_id, MonthDay};

/// How a point query samples the surrounding tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMode {
    /// Blend the four surrounding tile centers.
    #[default]
    Bilinear,
    /// Return the containing tile's record unchanged. Debugging aid.
    Nearest,
}

/// Samples the day climatology at a point.
///
/// Returns `Ok(None)` for points outside the store's bounding box and for
/// points where none of the surrounding tiles have a record.
pub fn day_at_point(
    store: &TileStore,
    grid: &TileGrid,
    lat: f64,
    lon: f64,
    md: MonthDay,
    mode: SamplingMode,
) -> Result<Option<DayClimatology>, StoreError> {
    if !grid.bbox().contains(lat, lon) {
        return Ok(None);
    }
    match mode {
        SamplingMode::Nearest => nearest(store, grid, lat, lon, md),
        SamplingMode::Bilinear => bilinear(store, grid, lat, lon, md),
    }
}

fn nearest(
    store: &TileStore,
    grid: &TileGrid,
    lat: f64,
    lon: f64,
    md: MonthDay,
) -> Result<Option<DayClimatology>, StoreError> {
    match grid.tile_for_point(lat, lon) {
        Some(tile) => store.day_record(&tile.id, md),
        None => Ok(None),
    }
}

fn bilinear(
    store: &TileStore,
    grid: &TileGrid,
    lat: f64,
    lon: f64,
    md: MonthDay,
) -> Result<Option<DayClimatology>, StoreError> {
    let max_row = grid.n_rows() - 1;
    if max_row < 0 {
        return Ok(None);
    }
    let fr = grid.row_fraction(lat);
    let r0 = (fr.floor() as i64).clamp(0, max_row);
    let r1 = (r0 + 1).min(max_row);
    let tr = (fr - r0 as f64).clamp(0.0, 1.0);

    // Column brackets are per row: the longitude step changes with the
    // row's latitude.
    let lower = row_blend(store, grid, r0, lon, md)?;
    let upper = if r1 == r0 {
        None
    } else {
        row_blend(store, grid, r1, lon, md)?
    };
    Ok(blend(lower, upper, tr))
}

fn row_blend(
    store: &TileStore,
    grid: &TileGrid,
    row: i64,
    lon: f64,
    md: MonthDay,
) -> Result<Option<DayClimatology>, StoreError> {
    let max_col = grid.n_cols(row) - 1;
    if max_col < 0 {
        return Ok(None);
    }
    let fc = grid.col_fraction(row, lon);
    let c0 = (fc.floor() as i64).clamp(0, max_col);
    let c1 = (c0 + 1).min(max_col);
    let tc = (fc - c0 as f64).clamp(0.0, 1.0);

    let a = store.day_record(&tile_id(row, c0), md)?;
    let b = if c1 == c0 {
        None
    } else {
        store.day_record(&tile_id(row, c1), md)?
    };
    Ok(blend(a, b, tc))
}

/// Pairwise blend of two optional records.
///
/// A missing record carries the other side; sample counts take the minimum
/// of both sides so an interpolated value never claims more support than
/// its weakest contributor.
fn blend(a: Option<DayClimatology>, b: Option<DayClimatology>, t: f64) -> Option<DayClimatology> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => Some(DayClimatology {
            temperature_c: lerp_opt(a.temperature_c, b.temperature_c, t),
            temp_p25: lerp_opt(a.temp_p25, b.temp_p25, t),
            temp_p75: lerp_opt(a.temp_p75, b.temp_p75, t),
            temp_std: lerp_opt(a.temp_std, b.temp_std, t),
            precipitation_mm: lerp_opt(a.precipitation_mm, b.precipitation_mm, t),
            rain_probability: lerp_opt(a.rain_probability, b.rain_probability, t),
            rain_typical_mm: lerp_opt(a.rain_typical_mm, b.rain_typical_mm, t),
            wind_speed_ms: lerp_opt(a.wind_speed_ms, b.wind_speed_ms, t),
            wind_dir_deg: blend_angle(a.wind_dir_deg, b.wind_dir_deg, t),
            wind_var_deg: lerp_opt(a.wind_var_deg, b.wind_var_deg, t),
            temp_hist_p25: lerp_opt(a.temp_hist_p25, b.temp_hist_p25, t),
            temp_hist_p75: lerp_opt(a.temp_hist_p75, b.temp_hist_p75, t),
            temp_day_median: lerp_opt(a.temp_day_median, b.temp_day_median, t),
            temp_day_p25: lerp_opt(a.temp_day_p25, b.temp_day_p25, t),
            temp_day_p75: lerp_opt(a.temp_day_p75, b.temp_day_p75, t),
            samples_daily: a.samples_daily.min(b.samples_daily),
            samples_rain: a.samples_rain.min(b.samples_rain),
            samples_wind: a.samples_wind.min(b.samples_wind),
            samples_day_means: a.samples_day_means.min(b.samples_day_means),
            samples_day_hours: a.samples_day_hours.min(b.samples_day_hours),
        }),
    }
}

fn lerp_opt(a: Option<f64>, b: Option<f64>, t: f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(stats::lerp(a, b, t)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn blend_angle(a: Option<f64>, b: Option<f64>, t: f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(stats::lerp_angle_deg(a, b, t)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
