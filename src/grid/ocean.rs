//! Ocean-policy filtering backed by a land-mask raster.
//!
//! The mask is a coarse equal-angle grid of land bits stored as a bincode
//! file. Coastal classification samples a ring of bearings at three radii
//! around a sea tile's center; if any sampled point is land the tile
//! counts as coastal sea.

use std::path::{Path, PathBuf};

use bincode::config::{Configuration, Fixint, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::KM_PER_DEG_LAT;
use crate::types::config::OceanPolicy;
use crate::types::tile::Tile;

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

const COASTAL_BEARINGS: usize = 16;

#[derive(Debug, Error)]
pub enum LandMaskError {
    #[error("failed to read land mask '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to decode land mask '{0}'")]
    Decode(PathBuf, #[source] Box<bincode::error::DecodeError>),

    #[error("failed to encode land mask")]
    Encode(#[source] Box<bincode::error::EncodeError>),

    #[error("failed to write land mask '{0}'")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("land mask dimensions {rows}x{cols} do not match {bits} cells")]
    Shape { rows: u32, cols: u32, bits: usize },
}

/// Row-major bitmap of land cells on an equal-angle grid.
///
/// Points outside the mask's extent are treated as sea.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandMask {
    lat_min: f64,
    lon_min: f64,
    cell_deg: f64,
    rows: u32,
    cols: u32,
    bits: Vec<u8>,
}

impl LandMask {
    /// Builds a mask from row-major land flags, southernmost row first.
    pub fn from_cells(
        lat_min: f64,
        lon_min: f64,
        cell_deg: f64,
        rows: u32,
        cols: u32,
        land: &[bool],
    ) -> Result<Self, LandMaskError> {
        if land.len() != (rows as usize) * (cols as usize) {
            return Err(LandMaskError::Shape {
                rows,
                cols,
                bits: land.len(),
            });
        }
        let mut bits = vec![0u8; land.len().div_ceil(8)];
        for (i, is_land) in land.iter().enumerate() {
            if *is_land {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(LandMask {
            lat_min,
            lon_min,
            cell_deg,
            rows,
            cols,
            bits,
        })
    }

    pub fn load(path: &Path) -> Result<Self, LandMaskError> {
        let bytes = std::fs::read(path)
            .map_err(|e| LandMaskError::Read(path.to_path_buf(), e))?;
        let (mask, _) = bincode::serde::decode_from_slice::<LandMask, _>(&bytes, BINCODE_CONFIG)
            .map_err(|e| LandMaskError::Decode(path.to_path_buf(), Box::new(e)))?;
        Ok(mask)
    }

    pub fn save(&self, path: &Path) -> Result<(), LandMaskError> {
        let bytes = bincode::serde::encode_to_vec(self, BINCODE_CONFIG)
            .map_err(|e| LandMaskError::Encode(Box::new(e)))?;
        std::fs::write(path, &bytes).map_err(|e| LandMaskError::Write(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn is_land(&self, lat: f64, lon: f64) -> bool {
        let row = ((lat - self.lat_min) / self.cell_deg).floor();
        let col = ((lon - self.lon_min) / self.cell_deg).floor();
        if row < 0.0 || col < 0.0 || row >= self.rows as f64 || col >= self.cols as f64 {
            return false;
        }
        let idx = row as usize * self.cols as usize + col as usize;
        self.bits[idx / 8] >> (idx % 8) & 1 == 1
    }
}

/// Applies an ocean policy to a generated tile list.
///
/// The caller is responsible for having downgraded the policy to
/// [`OceanPolicy::All`] when no mask is available.
pub fn filter_tiles(tiles: Vec<Tile>, policy: OceanPolicy, mask: Option<&LandMask>) -> Vec<Tile> {
    let mask = match (policy, mask) {
        (OceanPolicy::All, _) | (_, None) => return tiles,
        (_, Some(m)) => m,
    };
    tiles
        .into_iter()
        .filter(|t| match policy {
            OceanPolicy::All => true,
            OceanPolicy::Land => mask.is_land(t.lat, t.lon),
            OceanPolicy::Coastal { sea_km } => {
                mask.is_land(t.lat, t.lon) || is_coastal_sea(t.lat, t.lon, sea_km, mask)
            }
        })
        .collect()
}

/// Whether a sea point lies within `sea_km` of land.
///
/// Samples 16 bearings at the full, 2/3 and 1/3 radius so small islands
/// and jagged coastlines are less likely to slip between rays.
pub fn is_coastal_sea(lat: f64, lon: f64, sea_km: f64, mask: &LandMask) -> bool {
    if sea_km <= 0.0 {
        return false;
    }
    let c = lat.to_radians().cos().max(0.05);
    for radius in [sea_km, sea_km * 0.66, sea_km * 0.33] {
        for i in 0..COASTAL_BEARINGS {
            let bearing = (i as f64 * 360.0 / COASTAL_BEARINGS as f64).to_radians();
            let dlat = radius * bearing.cos() / KM_PER_DEG_LAT;
            let dlon = radius * bearing.sin() / (KM_PER_DEG_LAT * c);
            if mask.is_land(lat + dlat, lon + dlon) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileGrid;
    use crate::types::config::BoundingBox;

    // 4x4 degree mask around (45..49, 9..13): land in the western half.
    fn mask() -> LandMask {
        let mut cells = vec![false; 16];
        for row in 0..4 {
            for col in 0..2 {
                cells[row * 4 + col] = true;
            }
        }
        LandMask::from_cells(45.0, 9.0, 1.0, 4, 4, &cells).unwrap()
    }

    #[test]
    fn is_land_reads_the_bitmap() {
        let m = mask();
        assert!(m.is_land(45.5, 9.5));
        assert!(m.is_land(48.5, 10.5));
        assert!(!m.is_land(45.5, 11.5));
        assert!(!m.is_land(44.0, 9.5), "outside the extent is sea");
    }

    #[test]
    fn from_cells_rejects_mismatched_dimensions() {
        assert!(LandMask::from_cells(0.0, 0.0, 1.0, 2, 2, &[true; 5]).is_err());
    }

    #[test]
    fn mask_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.bin");
        let m = mask();
        m.save(&path).unwrap();
        let loaded = LandMask::load(&path).unwrap();
        assert!(loaded.is_land(45.5, 9.5));
        assert!(!loaded.is_land(45.5, 12.5));
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(LandMask::load(Path::new("/nonexistent/mask.bin")).is_err());
    }

    #[test]
    fn land_policy_drops_sea_tiles() {
        let m = mask();
        let grid = TileGrid::new(BoundingBox::new(45.0, 48.0, 9.0, 13.0), 50.0).unwrap();
        let all = grid.tiles();
        let land = filter_tiles(all.clone(), OceanPolicy::Land, Some(&m));
        assert!(!land.is_empty());
        assert!(land.len() < all.len());
        assert!(land.iter().all(|t| m.is_land(t.lat, t.lon)));
    }

    #[test]
    fn coastal_policy_keeps_sea_near_land() {
        let m = mask();
        // Sea point one degree east of the land edge, well within 150 km.
        assert!(is_coastal_sea(46.5, 11.5, 150.0, &m));
        // Far east sea point outside any sampled radius.
        assert!(!is_coastal_sea(46.5, 12.9, 30.0, &m));
        assert!(!is_coastal_sea(46.5, 11.5, 0.0, &m));
    }

    #[test]
    fn coastal_policy_is_between_land_and_all() {
        let m = mask();
        let grid = TileGrid::new(BoundingBox::new(45.0, 48.0, 9.0, 13.0), 50.0).unwrap();
        let all = filter_tiles(grid.tiles(), OceanPolicy::All, Some(&m));
        let coastal = filter_tiles(
            grid.tiles(),
            OceanPolicy::Coastal { sea_km: 60.0 },
            Some(&m),
        );
        let land = filter_tiles(grid.tiles(), OceanPolicy::Land, Some(&m));
        assert!(land.len() <= coastal.len());
        assert!(coastal.len() <= all.len());
    }

    #[test]
    fn missing_mask_keeps_everything() {
        let grid = TileGrid::new(BoundingBox::new(45.0, 48.0, 9.0, 13.0), 50.0).unwrap();
        let tiles = grid.tiles();
        let kept = filter_tiles(tiles.clone(), OceanPolicy::Land, None);
        assert_eq!(kept.len(), tiles.len());
    }
}
