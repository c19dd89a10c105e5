//! Restartable tile build pipeline.
//!
//! A build run walks the tile mesh in deterministic (row, col) order and,
//! for every tile not already finished, fetches the archive series,
//! aggregates them and commits the result in one transaction. Progress
//! markers in the store make an interrupted run resumable: done tiles are
//! skipped, pending, failed and in-progress ones are rebuilt from scratch.

pub mod archive;

mod aggregate;
mod error;
mod pacing;

pub use error::{ArchiveError, BuildError};
pub use pacing::{deadline_interval, RateLimiter};

use std::sync::Arc;

use bon::bon;
use chrono::{NaiveDate, SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::build::aggregate::{TileAccumulator, TileClimatology};
use crate::build::archive::{ArchiveSource, OpenMeteoArchive};
use crate::grid::ocean::{filter_tiles, LandMask};
use crate::grid::TileGrid;
use crate::store::{meta_keys, StoreError, TileStore};
use crate::types::config::{BuildSpec, ConfigError, OceanPolicy, PacingSpec};
use crate::types::record::{BuildStatus, BuildSummary};
use crate::types::tile::Tile;

pub const PROVIDER_NAME: &str = "open-meteo";
pub const PROVIDER_ATTRIBUTION: &str = "Weather data by Open-Meteo.com (CC BY 4.0)";
const PROVIDER_TERMS_URL: &str = "https://open-meteo.com/en/terms";
const PROVIDER_LICENCE_URL: &str = "https://creativecommons.org/licenses/by/4.0/";

/// Drives one build run over a tile store.
///
/// Construction validates the spec; [`TileBuilder::run`] does the work and
/// may be called again on the same store to resume or extend a build.
pub struct TileBuilder {
    spec: BuildSpec,
    pacing: PacingSpec,
    store: TileStore,
    source: Arc<dyn ArchiveSource>,
    limiter: Arc<Mutex<RateLimiter>>,
}

#[bon]
impl TileBuilder {
    /// Creates a builder for `spec` writing into `store`.
    ///
    /// # Arguments
    ///
    /// * `spec` - What to build: extent, tile size, years, sampling rules.
    /// * `store` - Destination store; may already contain a partial build
    ///   of the same spec.
    /// * `pacing` - Request pacing, defaults to a polite fixed interval
    ///   with no deadline.
    /// * `source` - Archive override, defaults to the Open-Meteo client.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] when the spec is inconsistent and
    /// [`BuildError::Archive`] when the default HTTP client cannot be
    /// constructed.
    #[builder]
    pub fn new(
        spec: BuildSpec,
        store: TileStore,
        pacing: Option<PacingSpec>,
        source: Option<Arc<dyn ArchiveSource>>,
    ) -> Result<Self, BuildError> {
        spec.validate()?;
        let pacing = pacing.unwrap_or_default();
        let limiter = Arc::new(Mutex::new(RateLimiter::new(pacing.min_interval)));
        let source: Arc<dyn ArchiveSource> = match source {
            Some(source) => source,
            None => Arc::new(
                OpenMeteoArchive::builder()
                    .limiter(Arc::clone(&limiter))
                    .build()?,
            ),
        };
        Ok(TileBuilder {
            spec,
            pacing,
            store,
            source,
            limiter,
        })
    }
}

impl TileBuilder {
    pub fn store(&self) -> &TileStore {
        &self.store
    }

    /// Runs the pipeline over this run's shard of the mesh.
    ///
    /// Tiles already marked done are skipped (unless `force` was set);
    /// everything else is fetched, aggregated and committed one tile at a
    /// time. A tile that fails to fetch is recorded in the error state and
    /// the run continues; only configuration and store failures abort.
    ///
    /// # Returns
    ///
    /// Counts of what happened to the selected tiles.
    pub async fn run(&self) -> Result<BuildSummary, BuildError> {
        let grid = TileGrid::new(self.spec.bbox, self.spec.tile_km)?;

        // Capability probe: the ocean filter is only as good as its mask.
        let mask = if self.spec.ocean.needs_land_mask() {
            self.load_mask()
        } else {
            None
        };
        let ocean = if self.spec.ocean.needs_land_mask() && mask.is_none() {
            warn!(
                "Ocean policy '{}' needs a land mask; keeping every tile",
                self.spec.ocean.name()
            );
            OceanPolicy::All
        } else {
            self.spec.ocean
        };

        self.ensure_meta(ocean)?;
        self.store
            .meta_set(meta_keys::BUILD_STARTED_AT, &now_string())?;

        let tiles = filter_tiles(grid.tiles(), ocean, mask.as_ref());
        let selected: Vec<Tile> = tiles
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % self.spec.shard.count == self.spec.shard.index)
            .map(|(_, tile)| tile)
            .collect();

        let mut summary = BuildSummary {
            selected: selected.len(),
            ..BuildSummary::default()
        };
        let mut work = Vec::with_capacity(selected.len());
        for tile in selected {
            let done = matches!(
                self.store.build_state(&tile.id)?,
                Some(state) if state.status == BuildStatus::Done
            );
            if done && !self.spec.force {
                summary.skipped += 1;
            } else {
                work.push(tile);
            }
        }
        // Register the remaining work up front so an interrupted run's
        // status report shows what is left as pending.
        for tile in &work {
            self.store.upsert_tile(tile)?;
            if self.store.build_state(&tile.id)?.is_none() {
                self.store
                    .set_build_state(&tile.id, BuildStatus::Pending, None)?;
            }
        }
        if let Some(limit) = self.spec.max_tiles {
            work.truncate(limit);
        }
        info!(
            "Building {} of {} selected tiles ({} already done)",
            work.len(),
            summary.selected,
            summary.skipped
        );

        let chunks = self.spec.years.chunks(self.spec.chunk_years);
        let requests_per_tile = self.spec.requests_per_tile();
        for (index, tile) in work.iter().enumerate() {
            if let Some(deadline) = self.pacing.deadline {
                let remaining = (work.len() - index) * requests_per_tile;
                let interval = deadline_interval(deadline, Utc::now(), remaining);
                self.limiter.lock().await.set_interval(interval);
                debug!(
                    "Pacing interval {:.2}s with {} requests to go",
                    interval.as_secs_f64(),
                    remaining
                );
            }

            self.store
                .set_build_state(&tile.id, BuildStatus::InProgress, None)?;
            match self.build_tile(tile, &chunks).await {
                Ok(result) => {
                    self.store
                        .replace_tile_data(&tile.id, &result.days, &result.hours)?;
                    summary.built += 1;
                    info!("Built tile {} ({}/{})", tile.id, index + 1, work.len());
                }
                Err(err) => {
                    let message = error_chain(&err);
                    warn!("Tile {} failed: {message}", tile.id);
                    self.store
                        .set_build_state(&tile.id, BuildStatus::Error, Some(&message))?;
                    summary.failed += 1;
                }
            }
        }

        self.store
            .meta_set(meta_keys::BUILD_FINISHED_AT, &now_string())?;
        info!(
            "Build finished: {} built, {} skipped, {} failed",
            summary.built, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    async fn build_tile(
        &self,
        tile: &Tile,
        chunks: &[(NaiveDate, NaiveDate)],
    ) -> Result<TileClimatology, ArchiveError> {
        let mut acc = TileAccumulator::new(&self.spec.riding_hours);
        for &(start, end) in chunks {
            let daily = self.source.daily(tile.lat, tile.lon, start, end).await?;
            acc.add_daily(&daily);
            let hourly = self.source.hourly(tile.lat, tile.lon, start, end).await?;
            acc.add_hourly(&hourly);
        }
        Ok(acc.finalize(self.spec.min_samples, self.spec.wet_day_mm))
    }

    fn load_mask(&self) -> Option<LandMask> {
        let path = self.spec.land_mask.as_deref()?;
        match LandMask::load(path) {
            Ok(mask) => Some(mask),
            Err(err) => {
                warn!("Failed to load land mask {}: {err}", path.display());
                None
            }
        }
    }

    fn ensure_meta(&self, effective_ocean: OceanPolicy) -> Result<(), BuildError> {
        self.ensure_key(meta_keys::PROVIDER, PROVIDER_NAME)?;
        self.ensure_key(meta_keys::PROVIDER_ONLY, "true")?;
        self.ensure_key(meta_keys::TILE_KM, &self.spec.tile_km.to_string())?;
        self.ensure_json(meta_keys::BBOX, &self.spec.bbox)?;
        self.ensure_json(meta_keys::YEARS, &self.spec.years)?;
        self.ensure_key(meta_keys::CHUNK_YEARS, &self.spec.chunk_years.to_string())?;
        self.ensure_json(meta_keys::RIDING_HOURS, &self.spec.riding_hours)?;
        self.ensure_key(meta_keys::OCEAN_POLICY, effective_ocean.name())?;
        // Provider facts rather than build geometry; refreshed every run.
        self.store
            .meta_set(meta_keys::ATTRIBUTION, PROVIDER_ATTRIBUTION)?;
        self.store.meta_set(meta_keys::TERMS_URL, PROVIDER_TERMS_URL)?;
        self.store
            .meta_set(meta_keys::LICENCE_URL, PROVIDER_LICENCE_URL)?;
        Ok(())
    }

    fn ensure_json<T: Serialize>(&self, key: &'static str, value: &T) -> Result<(), BuildError> {
        let encoded = serde_json::to_string(value)
            .map_err(|source| StoreError::MetaEncode { key, source })?;
        self.ensure_key(key, &encoded)
    }

    /// Write-once metadata: the first run writes, later runs must agree.
    fn ensure_key(&self, key: &'static str, requested: &str) -> Result<(), BuildError> {
        match self.store.meta_get(key)? {
            Some(stored) if stored != requested => Err(ConfigError::StoreMismatch {
                key,
                stored,
                requested: requested.to_string(),
            }
            .into()),
            Some(_) => Ok(()),
            None => {
                self.store.meta_set(key, requested)?;
                Ok(())
            }
        }
    }
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::build::archive::{DailyDay, HourlySample};
    use crate::types::config::{BoundingBox, YearRange};

    struct EmptySource;

    #[async_trait]
    impl ArchiveSource for EmptySource {
        async fn daily(
            &self,
            _lat: f64,
            _lon: f64,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyDay>, ArchiveError> {
            Ok(Vec::new())
        }

        async fn hourly(
            &self,
            _lat: f64,
            _lon: f64,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<HourlySample>, ArchiveError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArchiveSource for CountingSource {
        async fn daily(
            &self,
            _lat: f64,
            _lon: f64,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyDay>, ArchiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn hourly(
            &self,
            _lat: f64,
            _lon: f64,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<HourlySample>, ArchiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    /// Fails tiles in the southern latitude band.
    struct FlakySource;

    #[async_trait]
    impl ArchiveSource for FlakySource {
        async fn daily(
            &self,
            lat: f64,
            _lon: f64,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyDay>, ArchiveError> {
            if lat < 45.4 {
                Err(ArchiveError::RateLimited { attempts: 7 })
            } else {
                Ok(Vec::new())
            }
        }

        async fn hourly(
            &self,
            _lat: f64,
            _lon: f64,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<HourlySample>, ArchiveError> {
            Ok(Vec::new())
        }
    }

    // Two 50 km tiles: rows 0 and 1, one column each.
    fn test_spec() -> BuildSpec {
        BuildSpec {
            bbox: BoundingBox::new(45.0, 45.9, 9.0, 9.9),
            years: YearRange::new(2018, 2019),
            ocean: OceanPolicy::All,
            ..BuildSpec::default()
        }
    }

    fn builder_with(
        dir: &TempDir,
        spec: BuildSpec,
        source: Arc<dyn ArchiveSource>,
    ) -> TileBuilder {
        let store = TileStore::open(dir.path().join("store.sqlite")).unwrap();
        TileBuilder::builder()
            .spec(spec)
            .store(store)
            .source(source)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn run_builds_every_tile_and_writes_meta() {
        let dir = TempDir::new().unwrap();
        let builder = builder_with(&dir, test_spec(), Arc::new(EmptySource));
        let summary = builder.run().await.unwrap();
        assert_eq!(summary.selected, 2);
        assert_eq!(summary.built, 2);
        assert_eq!(summary.failed, 0);

        let store = builder.store();
        assert_eq!(store.tile_count().unwrap(), 2);
        assert_eq!(store.build_progress().unwrap().done, 2);
        let meta = store.read_meta().unwrap();
        assert_eq!(meta.provider, PROVIDER_NAME);
        assert_eq!(meta.ocean_policy, "all");
        assert_eq!(meta.years, YearRange::new(2018, 2019));
        assert!(store
            .meta_get(meta_keys::BUILD_FINISHED_AT)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn second_run_skips_done_tiles_unless_forced() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(CountingSource::default());

        let builder = builder_with(&dir, test_spec(), source.clone());
        builder.run().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        drop(builder);

        let builder = builder_with(&dir, test_spec(), source.clone());
        let summary = builder.run().await.unwrap();
        assert_eq!(summary.built, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        drop(builder);

        let spec = BuildSpec {
            force: true,
            ..test_spec()
        };
        let builder = builder_with(&dir, spec, source.clone());
        let summary = builder.run().await.unwrap();
        assert_eq!(summary.built, 2);
        assert_eq!(summary.skipped, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn changed_geometry_is_rejected_on_resume() {
        let dir = TempDir::new().unwrap();
        let builder = builder_with(&dir, test_spec(), Arc::new(EmptySource));
        builder.run().await.unwrap();
        drop(builder);

        let spec = BuildSpec {
            years: YearRange::new(2017, 2019),
            ..test_spec()
        };
        let builder = builder_with(&dir, spec, Arc::new(EmptySource));
        let err = builder.run().await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::Config(ConfigError::StoreMismatch { key: "years", .. })
        ));
    }

    #[tokio::test]
    async fn failed_tiles_are_recorded_and_retried_next_run() {
        let dir = TempDir::new().unwrap();
        let builder = builder_with(&dir, test_spec(), Arc::new(FlakySource));
        let summary = builder.run().await.unwrap();
        assert_eq!(summary.built, 1);
        assert_eq!(summary.failed, 1);

        let state = builder.store().build_state("r0_c0").unwrap().unwrap();
        assert_eq!(state.status, BuildStatus::Error);
        assert!(state.error.unwrap().contains("429"));
        drop(builder);

        // A re-run leaves the finished tile alone and retries the failed one.
        let builder = builder_with(&dir, test_spec(), Arc::new(EmptySource));
        let summary = builder.run().await.unwrap();
        assert_eq!(summary.built, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(builder.store().build_progress().unwrap().done, 2);
    }

    #[tokio::test]
    async fn max_tiles_limits_one_run_without_losing_progress() {
        let dir = TempDir::new().unwrap();
        let spec = BuildSpec {
            max_tiles: Some(1),
            ..test_spec()
        };
        let builder = builder_with(&dir, spec, Arc::new(EmptySource));
        let summary = builder.run().await.unwrap();
        assert_eq!(summary.built, 1);

        // The untouched tile is registered and visible as pending.
        let progress = builder.store().build_progress().unwrap();
        assert_eq!(progress.done, 1);
        assert_eq!(progress.pending, 1);
        drop(builder);

        let builder = builder_with(&dir, test_spec(), Arc::new(EmptySource));
        let summary = builder.run().await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.built, 1);
        assert_eq!(builder.store().build_progress().unwrap().done, 2);
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = BuildError::Config(ConfigError::InvalidChunkYears);
        assert_eq!(error_chain(&err), "chunk_years must be at least 1");
    }
}
