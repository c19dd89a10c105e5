//! Read client over a built climatology store.

use std::path::PathBuf;

use async_trait::async_trait;
use bon::bon;
use log::info;
use serde::Serialize;

use crate::build::{ArchiveError, PROVIDER_NAME};
use crate::error::ClimatileError;
use crate::grid::TileGrid;
use crate::interpolate::{day_at_point, SamplingMode};
use crate::store::TileStore;
use crate::types::config::BoundingBox;
use crate::types::record::{BuildProgress, DayClimatology, RidingHourClimatology, StoreMeta};
use crate::types::tile::{MonthDay, Tile};

/// Live upstream consulted for points the store cannot answer.
///
/// The store itself never fetches at query time. A caller that wants live
/// fill-in injects an implementation; strict-offline clients skip the
/// fallback entirely and read missing data as [`None`].
#[async_trait]
pub trait LiveFallback: Send + Sync {
    async fn day_at_point(
        &self,
        lat: f64,
        lon: f64,
        md: MonthDay,
    ) -> Result<Option<DayClimatology>, ArchiveError>;
}

/// One tile's stored record inside a [`DayGrid`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayGridPoint {
    pub tile: Tile,
    pub record: DayClimatology,
}

/// Every stored record intersecting a bounding box for one calendar day,
/// plus the geometry needed to rebuild the full grid with
/// [`TileGrid::new`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayGrid {
    /// Bounding box the store was built over, not the query box.
    pub bbox: BoundingBox,
    pub tile_km: f64,
    pub points: Vec<DayGridPoint>,
}

/// Client for querying a built climatology store.
///
/// Opening validates the store's provenance and reconstructs the tile grid
/// from the persisted geometry, so queries work against any store built
/// with compatible settings. All read methods take `&self` and never write.
pub struct Climatology {
    store: TileStore,
    grid: TileGrid,
    meta: StoreMeta,
    mode: SamplingMode,
    strict_offline: bool,
    fallback: Option<Box<dyn LiveFallback>>,
}

impl std::fmt::Debug for Climatology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Climatology")
            .field("store", &self.store)
            .field("grid", &self.grid)
            .field("meta", &self.meta)
            .field("mode", &self.mode)
            .field("strict_offline", &self.strict_offline)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[bon]
impl Climatology {
    /// Opens a store for reading.
    ///
    /// # Arguments
    ///
    /// * `path` - Store file produced by a build run.
    /// * `mode` - Optional sampling mode for point queries. Defaults to
    ///   [`SamplingMode::Bilinear`].
    /// * `strict_offline` - Optional. When `true`, missing data is reported
    ///   as `None` without consulting any fallback. Defaults to `false`.
    /// * `fallback` - Optional live upstream for points the store cannot
    ///   answer. Defaults to none.
    ///
    /// # Returns
    ///
    /// A `Result` containing the client, or a `ClimatileError` when the
    /// store cannot be opened, was built by a different provider, or its
    /// persisted geometry is incomplete.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::path::PathBuf;
    ///
    /// use climatile::Climatology;
    ///
    /// # async fn example() -> Result<(), climatile::ClimatileError> {
    /// let climate = Climatology::builder()
    ///     .path(PathBuf::from("data/alps.sqlite"))
    ///     .build()?;
    /// if let Some(day) = climate.at_point(46.2, 10.5, 7, 14).await? {
    ///     println!("typical mid-July temperature: {:?}", day.temperature_c);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[builder]
    pub fn new(
        path: PathBuf,
        mode: Option<SamplingMode>,
        strict_offline: Option<bool>,
        fallback: Option<Box<dyn LiveFallback>>,
    ) -> Result<Self, ClimatileError> {
        let store = TileStore::open(&path)?;
        let meta = store.read_meta()?;
        if meta.provider != PROVIDER_NAME {
            return Err(ClimatileError::ProviderMismatch {
                stored: meta.provider,
                expected: PROVIDER_NAME,
            });
        }
        let grid = TileGrid::new(meta.bbox, meta.tile_km)?;
        info!(
            "opened climatology store {} ({} tiles of {} km)",
            path.display(),
            grid.tiles().len(),
            meta.tile_km
        );
        Ok(Climatology {
            store,
            grid,
            meta,
            mode: mode.unwrap_or_default(),
            strict_offline: strict_offline.unwrap_or(false),
            fallback,
        })
    }
}

impl Climatology {
    /// Build settings persisted in the store.
    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Tile geometry reconstructed from the persisted settings.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Per-state tile counts, for checking how complete the store is.
    pub fn progress(&self) -> Result<BuildProgress, ClimatileError> {
        Ok(self.store.build_progress()?)
    }

    /// Samples the climatology for one calendar day at a point.
    ///
    /// Points outside the built area, or inside it but without any stored
    /// neighbor, read as `Ok(None)` unless a fallback is configured and
    /// strict-offline is off.
    pub async fn at_point(
        &self,
        lat: f64,
        lon: f64,
        month: u32,
        day: u32,
    ) -> Result<Option<DayClimatology>, ClimatileError> {
        let md = month_day(month, day)?;
        if let Some(record) = day_at_point(&self.store, &self.grid, lat, lon, md, self.mode)? {
            return Ok(Some(record));
        }
        if self.strict_offline {
            return Ok(None);
        }
        match &self.fallback {
            Some(live) => Ok(live.day_at_point(lat, lon, md).await?),
            None => Ok(None),
        }
    }

    /// Riding-hour statistics for the tile containing a point.
    ///
    /// Hour rows are per-tile facts, so this is a containing-tile lookup
    /// rather than an interpolation. Hours outside the store's riding
    /// window read as `Ok(None)`.
    pub fn riding_hour_at_point(
        &self,
        lat: f64,
        lon: f64,
        month: u32,
        day: u32,
        hour: u32,
    ) -> Result<Option<RidingHourClimatology>, ClimatileError> {
        let md = month_day(month, day)?;
        let Some(tile) = self.grid.tile_for_point(lat, lon) else {
            return Ok(None);
        };
        Ok(self.store.riding_hour_record(&tile.id, md, hour)?)
    }

    /// All stored records intersecting `bbox` for one calendar day.
    ///
    /// Tiles that never built (oceans, failed fetches) are simply absent
    /// from the result.
    pub fn grid_for_day(
        &self,
        bbox: &BoundingBox,
        month: u32,
        day: u32,
    ) -> Result<DayGrid, ClimatileError> {
        let md = month_day(month, day)?;
        let points = self
            .store
            .day_records_in_bbox(bbox, md)?
            .into_iter()
            .map(|(tile, record)| DayGridPoint { tile, record })
            .collect();
        Ok(DayGrid {
            bbox: self.grid.bbox(),
            tile_km: self.grid.tile_km(),
            points,
        })
    }
}

fn month_day(month: u32, day: u32) -> Result<MonthDay, ClimatileError> {
    MonthDay::new(month, day).ok_or(ClimatileError::InvalidMonthDay { month, day })
}
