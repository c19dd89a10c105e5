//! SQLite-backed tile store.
//!
//! One database file holds everything a deployment needs: the build
//! configuration snapshot (`meta`), the tile mesh (`tiles`), the aggregated
//! statistics (`climatology`, `riding_hourly`) and per-tile pipeline status
//! (`build_state`). The store is written tile-by-tile inside transactions,
//! so a killed build leaves only whole tiles behind and a re-run picks up
//! where it stopped.

mod error;
mod schema;

pub use error::StoreError;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::config::BoundingBox;
use crate::types::record::{
    BuildProgress, BuildState, BuildStatus, DayClimatology, RidingHourClimatology, StoreMeta,
};
use crate::types::tile::{MonthDay, Tile};

/// Keys used in the `meta` table.
///
/// Geometry keys (`bbox`, `years`, `tile_km`, ...) are written once by the
/// first build run and must match on every later run; the timestamps are
/// ordinary bookkeeping and get overwritten freely.
pub mod meta_keys {
    pub const PROVIDER: &str = "provider";
    pub const PROVIDER_ONLY: &str = "provider_only";
    pub const ATTRIBUTION: &str = "provider_attribution";
    pub const TERMS_URL: &str = "provider_terms_url";
    pub const LICENCE_URL: &str = "provider_licence_url";
    pub const TILE_KM: &str = "tile_km";
    pub const BBOX: &str = "bbox";
    pub const YEARS: &str = "years";
    pub const CHUNK_YEARS: &str = "chunk_years";
    pub const RIDING_HOURS: &str = "hourly_riding_hours";
    pub const OCEAN_POLICY: &str = "ocean_policy";
    pub const BUILD_STARTED_AT: &str = "last_build_started_at";
    pub const BUILD_FINISHED_AT: &str = "last_build_finished_at";
}

const DAY_COLUMNS: &str = "temperature_c, temp_p25, temp_p75, temp_std, precipitation_mm, \
     rain_probability, rain_typical_mm, wind_speed_ms, wind_dir_deg, wind_var_deg, \
     temp_hist_p25, temp_hist_p75, temp_day_p25, temp_day_p75, temp_day_median, \
     samples_daily, samples_rain, samples_wind, samples_day_means, samples_day_hours";

/// Handle to one tile store file.
///
/// All methods take `&self`; the underlying connection is serialized behind
/// a mutex so a store can be shared across tasks.
#[derive(Debug)]
pub struct TileStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl TileStore {
    /// Opens (and if necessary creates) the store at `path`, creating parent
    /// directories and applying the schema.
    ///
    /// WAL journaling keeps readers unblocked while a build is writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StoreError::CreateDir(parent.to_path_buf(), e))?;
            }
        }
        let conn = Connection::open(&path).map_err(|e| StoreError::Open(path.clone(), e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::Schema)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StoreError::Schema)?;
        conn.execute_batch(schema::create_schema())
            .map_err(StoreError::Schema)?;
        info!("Opened tile store at {}", path.display());
        Ok(TileStore {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // A poisoned lock only means another thread panicked mid-query; the
    // connection itself is still in a usable state.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Metadata ---

    pub fn meta_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Stores a JSON-encoded metadata value.
    pub fn meta_set_json<T: Serialize>(
        &self,
        key: &'static str,
        value: &T,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)
            .map_err(|source| StoreError::MetaEncode { key, source })?;
        self.meta_set(key, &encoded)
    }

    /// Reassembles the configuration snapshot a build run wrote.
    ///
    /// Read clients use this to reconstruct the tile grid without being told
    /// the build parameters, so every snapshot key must be present.
    pub fn read_meta(&self) -> Result<StoreMeta, StoreError> {
        Ok(StoreMeta {
            provider: self.require_meta(meta_keys::PROVIDER)?,
            bbox: self.require_json(meta_keys::BBOX)?,
            years: self.require_json(meta_keys::YEARS)?,
            tile_km: self.require_parsed(meta_keys::TILE_KM)?,
            chunk_years: self.require_parsed(meta_keys::CHUNK_YEARS)?,
            riding_hours: self.require_json(meta_keys::RIDING_HOURS)?,
            ocean_policy: self.require_meta(meta_keys::OCEAN_POLICY)?,
            attribution: self.require_meta(meta_keys::ATTRIBUTION)?,
        })
    }

    fn require_meta(&self, key: &'static str) -> Result<String, StoreError> {
        self.meta_get(key)?.ok_or(StoreError::MetaMissing(key))
    }

    fn require_json<T: DeserializeOwned>(&self, key: &'static str) -> Result<T, StoreError> {
        let value = self.require_meta(key)?;
        serde_json::from_str(&value).map_err(|_| StoreError::MetaValue { key, value })
    }

    fn require_parsed<T: FromStr>(&self, key: &'static str) -> Result<T, StoreError> {
        let value = self.require_meta(key)?;
        value
            .parse()
            .map_err(|_| StoreError::MetaValue { key, value })
    }

    // --- Tiles and build state ---

    pub fn upsert_tile(&self, tile: &Tile) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO tiles (tile_id, row, col, lat, lon) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(tile_id) DO UPDATE SET \
                 row = excluded.row, col = excluded.col, \
                 lat = excluded.lat, lon = excluded.lon",
            params![tile.id, tile.row, tile.col, tile.lat, tile.lon],
        )?;
        Ok(())
    }

    pub fn tile(&self, tile_id: &str) -> Result<Option<Tile>, StoreError> {
        let tile = self
            .conn()
            .query_row(
                "SELECT row, col, lat, lon FROM tiles WHERE tile_id = ?1",
                params![tile_id],
                Self::tile_from_row,
            )
            .optional()?;
        Ok(tile)
    }

    pub fn tile_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Tiles whose centers fall inside `bbox`, ordered by (row, col).
    pub fn tiles_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<Tile>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT row, col, lat, lon FROM tiles \
             WHERE lat BETWEEN ?1 AND ?2 AND lon BETWEEN ?3 AND ?4 \
             ORDER BY row, col",
        )?;
        let tiles = stmt
            .query_map(
                params![bbox.lat_min, bbox.lat_max, bbox.lon_min, bbox.lon_max],
                Self::tile_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tiles)
    }

    pub fn set_build_state(
        &self,
        tile_id: &str,
        status: BuildStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        upsert_state(&self.conn(), tile_id, status, error)?;
        Ok(())
    }

    pub fn build_state(&self, tile_id: &str) -> Result<Option<BuildState>, StoreError> {
        let row = self
            .conn()
            .query_row(
                "SELECT status, updated_at, error FROM build_state WHERE tile_id = ?1",
                params![tile_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, updated_at, error)) = row else {
            return Ok(None);
        };
        let status = BuildStatus::parse(&status).ok_or(StoreError::MetaValue {
            key: "status",
            value: status.clone(),
        })?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|_| StoreError::MetaValue {
                key: "updated_at",
                value: updated_at.clone(),
            })?
            .with_timezone(&Utc);
        Ok(Some(BuildState {
            status,
            updated_at,
            error,
        }))
    }

    pub fn build_progress(&self) -> Result<BuildProgress, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM build_state GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut progress = BuildProgress::default();
        for (status, count) in counts {
            match BuildStatus::parse(&status) {
                Some(BuildStatus::Done) => progress.done = count as usize,
                Some(BuildStatus::InProgress) => progress.in_progress = count as usize,
                Some(BuildStatus::Error) => progress.error = count as usize,
                Some(BuildStatus::Pending) | None => progress.pending += count as usize,
            }
        }
        Ok(progress)
    }

    // --- Climatology rows ---

    /// Replaces every stored row for `tile_id` and marks the tile done, all
    /// in one transaction. Interrupting the process never leaves a tile
    /// half-written.
    pub fn replace_tile_data(
        &self,
        tile_id: &str,
        days: &[(MonthDay, DayClimatology)],
        hours: &[(MonthDay, RidingHourClimatology)],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM climatology WHERE tile_id = ?1", params![tile_id])?;
        tx.execute(
            "DELETE FROM riding_hourly WHERE tile_id = ?1",
            params![tile_id],
        )?;
        {
            let mut insert_day = tx.prepare(
                "INSERT INTO climatology (tile_id, month, day, \
                     temperature_c, temp_p25, temp_p75, temp_std, \
                     precipitation_mm, rain_probability, rain_typical_mm, \
                     wind_speed_ms, wind_dir_deg, wind_var_deg, \
                     temp_hist_p25, temp_hist_p75, \
                     temp_day_p25, temp_day_p75, temp_day_median, \
                     samples_daily, samples_rain, samples_wind, \
                     samples_day_means, samples_day_hours) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            )?;
            for (md, rec) in days {
                insert_day.execute(params![
                    tile_id,
                    md.month(),
                    md.day(),
                    rec.temperature_c,
                    rec.temp_p25,
                    rec.temp_p75,
                    rec.temp_std,
                    rec.precipitation_mm,
                    rec.rain_probability,
                    rec.rain_typical_mm,
                    rec.wind_speed_ms,
                    rec.wind_dir_deg,
                    rec.wind_var_deg,
                    rec.temp_hist_p25,
                    rec.temp_hist_p75,
                    rec.temp_day_p25,
                    rec.temp_day_p75,
                    rec.temp_day_median,
                    rec.samples_daily,
                    rec.samples_rain,
                    rec.samples_wind,
                    rec.samples_day_means,
                    rec.samples_day_hours,
                ])?;
            }
            let mut insert_hour = tx.prepare(
                "INSERT INTO riding_hourly (tile_id, month, day, hour, \
                     temp_median, temp_p25, temp_p75, samples) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (md, rec) in hours {
                insert_hour.execute(params![
                    tile_id,
                    md.month(),
                    md.day(),
                    rec.hour,
                    rec.temp_median,
                    rec.temp_p25,
                    rec.temp_p75,
                    rec.samples,
                ])?;
            }
        }
        upsert_state(&tx, tile_id, BuildStatus::Done, None)?;
        tx.commit()?;
        Ok(())
    }

    pub fn day_record(
        &self,
        tile_id: &str,
        md: MonthDay,
    ) -> Result<Option<DayClimatology>, StoreError> {
        let sql = format!(
            "SELECT {DAY_COLUMNS} FROM climatology \
             WHERE tile_id = ?1 AND month = ?2 AND day = ?3"
        );
        let rec = self
            .conn()
            .query_row(&sql, params![tile_id, md.month(), md.day()], |row| {
                Self::day_at(row, 0)
            })
            .optional()?;
        Ok(rec)
    }

    pub fn riding_hour_record(
        &self,
        tile_id: &str,
        md: MonthDay,
        hour: u32,
    ) -> Result<Option<RidingHourClimatology>, StoreError> {
        let rec = self
            .conn()
            .query_row(
                "SELECT temp_median, temp_p25, temp_p75, samples FROM riding_hourly \
                 WHERE tile_id = ?1 AND month = ?2 AND day = ?3 AND hour = ?4",
                params![tile_id, md.month(), md.day(), hour],
                |row| {
                    Ok(RidingHourClimatology {
                        hour,
                        temp_median: row.get(0)?,
                        temp_p25: row.get(1)?,
                        temp_p75: row.get(2)?,
                        samples: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(rec)
    }

    /// All day records for one calendar day whose tile centers fall inside
    /// `bbox`, ordered by (row, col).
    pub fn day_records_in_bbox(
        &self,
        bbox: &BoundingBox,
        md: MonthDay,
    ) -> Result<Vec<(Tile, DayClimatology)>, StoreError> {
        let sql = format!(
            "SELECT t.row, t.col, t.lat, t.lon, {DAY_COLUMNS} \
             FROM tiles t JOIN climatology c ON c.tile_id = t.tile_id \
             WHERE c.month = ?1 AND c.day = ?2 \
               AND t.lat BETWEEN ?3 AND ?4 AND t.lon BETWEEN ?5 AND ?6 \
             ORDER BY t.row, t.col"
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    md.month(),
                    md.day(),
                    bbox.lat_min,
                    bbox.lat_max,
                    bbox.lon_min,
                    bbox.lon_max
                ],
                |row| Ok((Self::tile_from_row(row)?, Self::day_at(row, 4)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn tile_from_row(row: &Row<'_>) -> rusqlite::Result<Tile> {
        Ok(Tile::new(
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
        ))
    }

    fn day_at(row: &Row<'_>, base: usize) -> rusqlite::Result<DayClimatology> {
        Ok(DayClimatology {
            temperature_c: row.get(base)?,
            temp_p25: row.get(base + 1)?,
            temp_p75: row.get(base + 2)?,
            temp_std: row.get(base + 3)?,
            precipitation_mm: row.get(base + 4)?,
            rain_probability: row.get(base + 5)?,
            rain_typical_mm: row.get(base + 6)?,
            wind_speed_ms: row.get(base + 7)?,
            wind_dir_deg: row.get(base + 8)?,
            wind_var_deg: row.get(base + 9)?,
            temp_hist_p25: row.get(base + 10)?,
            temp_hist_p75: row.get(base + 11)?,
            temp_day_p25: row.get(base + 12)?,
            temp_day_p75: row.get(base + 13)?,
            temp_day_median: row.get(base + 14)?,
            samples_daily: row.get(base + 15)?,
            samples_rain: row.get(base + 16)?,
            samples_wind: row.get(base + 17)?,
            samples_day_means: row.get(base + 18)?,
            samples_day_hours: row.get(base + 19)?,
        })
    }
}

fn upsert_state(
    conn: &Connection,
    tile_id: &str,
    status: BuildStatus,
    error: Option<&str>,
) -> rusqlite::Result<()> {
    let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false);
    conn.execute(
        "INSERT INTO build_state (tile_id, status, updated_at, error) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(tile_id) DO UPDATE SET \
             status = excluded.status, updated_at = excluded.updated_at, \
             error = excluded.error",
        params![tile_id, status.as_str(), updated_at, error],
    )?;
    Ok(())
}
