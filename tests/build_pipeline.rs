//! End-to-end pipeline tests over a synthetic archive source.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use tempfile::TempDir;

use climatile::{
    ArchiveError, ArchiveSource, BoundingBox, BuildSpec, BuildStatus, Climatology, DailyDay,
    HourlySample, MonthDay, OceanPolicy, TileBuilder, TileStore, YearRange, PROVIDER_NAME,
};

/// Two 50 km tiles stacked north-south, one column each.
const BBOX: BoundingBox = BoundingBox {
    lat_min: 45.0,
    lat_max: 45.9,
    lon_min: 9.0,
    lon_max: 9.9,
};

fn spec() -> BuildSpec {
    BuildSpec {
        bbox: BBOX,
        tile_km: 50.0,
        ocean: OceanPolicy::All,
        years: YearRange::new(2018, 2019),
        chunk_years: 2,
        riding_hours: vec![10, 14],
        ..BuildSpec::default()
    }
}

/// Seasonal phase peaking on Jan 15, so mid-January values are exact.
fn season(date: NaiveDate) -> f64 {
    (2.0 * std::f64::consts::PI * (date.ordinal() as f64 - 15.0) / 365.25).cos()
}

fn daily_series(lat: f64, start: NaiveDate, end: NaiveDate) -> Vec<DailyDay> {
    let mut days = Vec::new();
    let mut date = start;
    while date <= end {
        let wet = date.ordinal() % 3 == 0;
        days.push(DailyDay {
            date,
            temp_mean_c: Some(10.0 - 8.0 * season(date) + (lat - 45.0)),
            precip_sum_mm: Some(if wet { 3.0 } else { 0.0 }),
            wind_speed_kmh: Some(18.0),
            wind_dir_deg: Some(270.0),
        });
        date = date.succ_opt().unwrap();
    }
    days
}

fn hourly_series(lat: f64, start: NaiveDate, end: NaiveDate) -> Vec<HourlySample> {
    let mut samples = Vec::new();
    let mut date = start;
    while date <= end {
        for hour in [10u32, 14] {
            samples.push(HourlySample {
                time: date.and_hms_opt(hour, 0, 0).unwrap(),
                temp_c: Some(12.0 - 8.0 * season(date) + hour as f64 / 10.0 + (lat - 45.0)),
            });
        }
        date = date.succ_opt().unwrap();
    }
    samples
}

/// Smooth seasonal temperature, rain every third day of the year, steady
/// westerly wind. Deterministic in (date, lat), so independent builds over
/// the same range must produce identical stores.
struct SinusoidSource;

#[async_trait]
impl ArchiveSource for SinusoidSource {
    async fn daily(
        &self,
        lat: f64,
        _lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyDay>, ArchiveError> {
        Ok(daily_series(lat, start, end))
    }

    async fn hourly(
        &self,
        lat: f64,
        _lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HourlySample>, ArchiveError> {
        Ok(hourly_series(lat, start, end))
    }
}

/// Serves the southern tile and refuses the northern one.
struct HalfBrokenSource;

impl HalfBrokenSource {
    fn gate(lat: f64) -> Result<(), ArchiveError> {
        if lat > 45.4 {
            return Err(ArchiveError::Status {
                status: 503,
                url: "synthetic".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveSource for HalfBrokenSource {
    async fn daily(
        &self,
        lat: f64,
        _lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyDay>, ArchiveError> {
        Self::gate(lat)?;
        Ok(daily_series(lat, start, end))
    }

    async fn hourly(
        &self,
        lat: f64,
        _lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HourlySample>, ArchiveError> {
        Self::gate(lat)?;
        Ok(hourly_series(lat, start, end))
    }
}

fn builder(path: &Path, spec: BuildSpec, source: Arc<dyn ArchiveSource>) -> TileBuilder {
    TileBuilder::builder()
        .spec(spec)
        .store(TileStore::open(path).unwrap())
        .source(source)
        .build()
        .unwrap()
}

fn assert_stores_equal(a: &TileStore, b: &TileStore) {
    let tiles_a = a.tiles_in_bbox(&BBOX).unwrap();
    let tiles_b = b.tiles_in_bbox(&BBOX).unwrap();
    assert_eq!(tiles_a, tiles_b);
    for tile in &tiles_a {
        for md in MonthDay::all() {
            assert_eq!(
                a.day_record(&tile.id, md).unwrap(),
                b.day_record(&tile.id, md).unwrap(),
                "day rows differ for {} {md}",
                tile.id
            );
            for hour in [10u32, 14] {
                assert_eq!(
                    a.riding_hour_record(&tile.id, md, hour).unwrap(),
                    b.riding_hour_record(&tile.id, md, hour).unwrap(),
                    "hour rows differ for {} {md} {hour}h",
                    tile.id
                );
            }
        }
    }
}

#[tokio::test]
async fn a_full_build_stores_the_expected_climatology() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("alps.sqlite");

    let build = builder(&path, spec(), Arc::new(SinusoidSource));
    let summary = build.run().await.unwrap();
    assert_eq!(summary.selected, 2);
    assert_eq!(summary.built, 2);
    assert_eq!(summary.failed, 0);

    let store = build.store();
    let tiles = store.tiles_in_bbox(&BBOX).unwrap();
    assert_eq!(tiles.len(), 2);
    let south = &tiles[0];
    let offset = south.lat - 45.0;

    let jan15 = MonthDay::new(1, 15).unwrap();
    let day = store.day_record(&south.id, jan15).unwrap().unwrap();

    // Two riding-hour samples per date, so the daytime means (5.0 and 5.4
    // plus the latitude offset) replace the 24h daily means.
    assert!((day.temperature_c.unwrap() - (5.2 + offset)).abs() < 1e-9);
    assert!((day.temp_p25.unwrap() - (5.2 + offset)).abs() < 1e-9);
    assert!((day.temp_day_median.unwrap() - (5.2 + offset)).abs() < 1e-9);

    // Jan 15 is a wet day in every sampled year.
    assert!((day.precipitation_mm.unwrap() - 3.0).abs() < 1e-9);
    assert!((day.rain_probability.unwrap() - 1.0).abs() < 1e-9);
    assert!((day.rain_typical_mm.unwrap() - 3.0).abs() < 1e-9);

    // 18 km/h from due west, perfectly steady.
    assert!((day.wind_speed_ms.unwrap() - 5.0).abs() < 1e-9);
    assert!((day.wind_dir_deg.unwrap() - 270.0).abs() < 1e-6);
    assert!(day.wind_var_deg.unwrap() < 1e-3);

    assert_eq!(day.samples_daily, 2);
    assert_eq!(day.samples_rain, 2);
    assert_eq!(day.samples_wind, 2);

    // No leap year in range: the Feb 29 row exists but holds no data.
    let feb29 = MonthDay::new(2, 29).unwrap();
    let empty = store.day_record(&south.id, feb29).unwrap().unwrap();
    assert_eq!(empty.temperature_c, None);
    assert_eq!(empty.samples_daily, 0);

    let hour = store
        .riding_hour_record(&south.id, jan15, 10)
        .unwrap()
        .unwrap();
    assert!((hour.temp_median.unwrap() - (5.0 + offset)).abs() < 1e-9);
    assert_eq!(hour.samples, 2);
}

#[tokio::test]
async fn the_read_client_serves_the_built_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("alps.sqlite");

    let build = builder(&path, spec(), Arc::new(SinusoidSource));
    build.run().await.unwrap();
    let south = build.store().tiles_in_bbox(&BBOX).unwrap().remove(0);
    drop(build);

    let climate = Climatology::builder().path(path).build().unwrap();
    assert_eq!(climate.meta().provider, PROVIDER_NAME);
    assert_eq!(climate.meta().tile_km, 50.0);
    assert_eq!(climate.progress().unwrap().done, 2);

    let day = climate
        .at_point(south.lat, south.lon, 1, 15)
        .await
        .unwrap()
        .expect("tile center has data");
    assert!((day.temperature_c.unwrap() - (5.2 + south.lat - 45.0)).abs() < 1e-9);
    assert!((day.wind_speed_ms.unwrap() - 5.0).abs() < 1e-9);

    let hour = climate
        .riding_hour_at_point(south.lat, south.lon, 1, 15, 14)
        .unwrap()
        .expect("hour 14 is stored");
    assert!((hour.temp_median.unwrap() - (5.4 + south.lat - 45.0)).abs() < 1e-9);

    let grid = climate.grid_for_day(&BBOX, 1, 15).unwrap();
    assert_eq!(grid.points.len(), 2);
}

#[tokio::test]
async fn an_interrupted_build_resumes_to_an_identical_store() {
    let dir = TempDir::new().unwrap();
    let split = dir.path().join("split.sqlite");
    let whole = dir.path().join("whole.sqlite");

    let first = builder(
        &split,
        BuildSpec {
            max_tiles: Some(1),
            ..spec()
        },
        Arc::new(SinusoidSource),
    );
    let summary = first.run().await.unwrap();
    assert_eq!(summary.built, 1);
    drop(first);

    let resumed = builder(&split, spec(), Arc::new(SinusoidSource));
    let summary = resumed.run().await.unwrap();
    assert_eq!(summary.built, 1);
    assert_eq!(summary.skipped, 1);

    let reference = builder(&whole, spec(), Arc::new(SinusoidSource));
    reference.run().await.unwrap();

    assert_stores_equal(resumed.store(), reference.store());
}

#[tokio::test]
async fn failed_tiles_recover_on_the_next_run() {
    let dir = TempDir::new().unwrap();
    let flaky = dir.path().join("flaky.sqlite");
    let whole = dir.path().join("whole.sqlite");

    let first = builder(&flaky, spec(), Arc::new(HalfBrokenSource));
    let summary = first.run().await.unwrap();
    assert_eq!(summary.built, 1);
    assert_eq!(summary.failed, 1);

    let north = first.store().tiles_in_bbox(&BBOX).unwrap().pop().unwrap();
    let state = first.store().build_state(&north.id).unwrap().unwrap();
    assert_eq!(state.status, BuildStatus::Error);
    assert!(state.error.unwrap().contains("503"));
    drop(first);

    let healed = builder(&flaky, spec(), Arc::new(SinusoidSource));
    let summary = healed.run().await.unwrap();
    assert_eq!(summary.built, 1);
    assert_eq!(summary.skipped, 1);

    let reference = builder(&whole, spec(), Arc::new(SinusoidSource));
    reference.run().await.unwrap();
    assert_stores_equal(healed.store(), reference.store());
}

#[tokio::test]
async fn forced_rebuilds_reproduce_the_same_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("alps.sqlite");

    let first = builder(&path, spec(), Arc::new(SinusoidSource));
    first.run().await.unwrap();
    let south = first.store().tiles_in_bbox(&BBOX).unwrap().remove(0);
    let jan15 = MonthDay::new(1, 15).unwrap();
    let before = first.store().day_record(&south.id, jan15).unwrap();
    drop(first);

    let again = builder(
        &path,
        BuildSpec {
            force: true,
            ..spec()
        },
        Arc::new(SinusoidSource),
    );
    let summary = again.run().await.unwrap();
    assert_eq!(summary.built, 2);
    assert_eq!(summary.skipped, 0);

    let after = again.store().day_record(&south.id, jan15).unwrap();
    assert_eq!(before, after);
}
