//! Tile mesh geometry.
//!
//! The grid partitions a bounding box into cells that are approximately
//! square in kilometers: the latitude step is constant while the longitude
//! step widens toward the poles with `1 / cos(lat)`. Rows are latitude
//! bands; columns are band-relative, so two rows rarely share a column
//! count. All lookups here are closed-form arithmetic over the same
//! formulas the builder used, which is what makes tile ids stable across
//! build and query.

pub mod ocean;

use crate::types::config::{BoundingBox, ConfigError};
use crate::types::tile::Tile;

/// Mean kilometers per degree of latitude.
pub const KM_PER_DEG_LAT: f64 = 111.32;

// Longitude steps blow up near the poles; the clamp keeps them finite.
const MIN_COS_LAT: f64 = 0.05;

// Tolerance for "center still inside the bbox" at the far edge.
const CENTER_EPS: f64 = 1e-9;

/// Deterministic tile mesh over a bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    bbox: BoundingBox,
    tile_km: f64,
}

impl TileGrid {
    pub fn new(bbox: BoundingBox, tile_km: f64) -> Result<Self, ConfigError> {
        bbox.validate()?;
        if !(tile_km > 0.0) {
            return Err(ConfigError::InvalidTileKm(tile_km));
        }
        Ok(TileGrid { bbox, tile_km })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn tile_km(&self) -> f64 {
        self.tile_km
    }

    pub fn lat_step(&self) -> f64 {
        self.tile_km / KM_PER_DEG_LAT
    }

    /// Longitude step of the band whose center sits at `lat`.
    pub fn lon_step_at(&self, lat: f64) -> f64 {
        let c = lat.to_radians().cos().max(MIN_COS_LAT);
        self.tile_km / (KM_PER_DEG_LAT * c)
    }

    /// Center latitude of a row; rows count up from the southern edge.
    pub fn row_center(&self, row: i64) -> f64 {
        self.bbox.lat_min + (row as f64 + 0.5) * self.lat_step()
    }

    /// Center longitude of a column within `row`'s band.
    pub fn col_center(&self, row: i64, col: i64) -> f64 {
        self.bbox.lon_min + (col as f64 + 0.5) * self.lon_step_at(self.row_center(row))
    }

    /// Number of rows whose centers fall inside the bbox.
    pub fn n_rows(&self) -> i64 {
        let span = self.bbox.lat_max - self.bbox.lat_min;
        let mut n = (span / self.lat_step() + 0.5).floor() as i64;
        if n < 0 {
            n = 0;
        }
        while n > 0 && self.row_center(n - 1) > self.bbox.lat_max + CENTER_EPS {
            n -= 1;
        }
        while self.row_center(n) <= self.bbox.lat_max + CENTER_EPS {
            n += 1;
        }
        n
    }

    /// Number of columns in `row`'s band.
    pub fn n_cols(&self, row: i64) -> i64 {
        let span = self.bbox.lon_max - self.bbox.lon_min;
        let step = self.lon_step_at(self.row_center(row));
        let mut n = (span / step + 0.5).floor() as i64;
        if n < 0 {
            n = 0;
        }
        let center = |c: i64| self.bbox.lon_min + (c as f64 + 0.5) * step;
        while n > 0 && center(n - 1) > self.bbox.lon_max + CENTER_EPS {
            n -= 1;
        }
        while center(n) <= self.bbox.lon_max + CENTER_EPS {
            n += 1;
        }
        n
    }

    /// Every tile of the mesh, ordered by (row, col).
    pub fn tiles(&self) -> Vec<Tile> {
        let mut out = Vec::new();
        for row in 0..self.n_rows() {
            let lat_c = self.row_center(row).clamp(-90.0, 90.0);
            let step_lon = self.lon_step_at(self.row_center(row));
            for col in 0..self.n_cols(row) {
                let lon_c = self.bbox.lon_min + (col as f64 + 0.5) * step_lon;
                out.push(Tile::new(row, col, lat_c, lon_c));
            }
        }
        out
    }

    /// The tile whose cell contains the point, or `None` outside the bbox.
    pub fn tile_for_point(&self, lat: f64, lon: f64) -> Option<Tile> {
        if !self.bbox.contains(lat, lon) {
            return None;
        }
        let row = ((lat - self.bbox.lat_min) / self.lat_step()).floor() as i64;
        if row < 0 {
            return None;
        }
        let lat_c = self.row_center(row);
        if lat_c > self.bbox.lat_max + CENTER_EPS {
            return None;
        }
        let step_lon = self.lon_step_at(lat_c);
        let col = ((lon - self.bbox.lon_min) / step_lon).floor() as i64;
        if col < 0 {
            return None;
        }
        let lon_c = self.bbox.lon_min + (col as f64 + 0.5) * step_lon;
        if lon_c > self.bbox.lon_max + CENTER_EPS {
            return None;
        }
        Some(Tile::new(row, col, lat_c.clamp(-90.0, 90.0), lon_c))
    }

    /// Continuous row position of a latitude, in units of rows, where
    /// integer values sit exactly on row centers.
    pub fn row_fraction(&self, lat: f64) -> f64 {
        (lat - self.bbox.lat_min) / self.lat_step() - 0.5
    }

    /// Continuous column position of a longitude within `row`'s band,
    /// where integer values sit exactly on column centers.
    pub fn col_fraction(&self, row: i64, lon: f64) -> f64 {
        (lon - self.bbox.lon_min) / self.lon_step_at(self.row_center(row)) - 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haversine::{distance, Location, Units};

    fn grid() -> TileGrid {
        TileGrid::new(BoundingBox::new(45.0, 48.0, 9.0, 14.0), 50.0).unwrap()
    }

    fn km(a: (f64, f64), b: (f64, f64)) -> f64 {
        distance(
            Location {
                latitude: a.0,
                longitude: a.1,
            },
            Location {
                latitude: b.0,
                longitude: b.1,
            },
            Units::Kilometers,
        )
    }

    #[test]
    fn lat_step_is_latitude_independent() {
        let g = grid();
        assert!((g.lat_step() - 50.0 / 111.32).abs() < 1e-12);
    }

    #[test]
    fn adjacent_row_centers_are_tile_km_apart() {
        let g = grid();
        let d = km((g.row_center(0), 10.0), (g.row_center(1), 10.0));
        assert!((d - 50.0).abs() < 0.5, "row spacing was {} km", d);
    }

    #[test]
    fn adjacent_col_centers_are_tile_km_apart() {
        let g = grid();
        let lat = g.row_center(2);
        let d = km((lat, g.col_center(2, 0)), (lat, g.col_center(2, 1)));
        assert!((d - 50.0).abs() < 0.5, "col spacing was {} km", d);
    }

    #[test]
    fn higher_bands_hold_fewer_columns() {
        // Same lon span, wider steps toward the pole.
        let g = TileGrid::new(BoundingBox::new(40.0, 70.0, 0.0, 20.0), 50.0).unwrap();
        let south = g.n_cols(0);
        let north = g.n_cols(g.n_rows() - 1);
        assert!(
            north < south,
            "expected fewer columns at {} than {}",
            north,
            south
        );
        // The counts shrink with cos(lat) up to the ±1 truncation of each
        // band's own rounding.
        let ratio = g.row_center(0).to_radians().cos() / g.row_center(g.n_rows() - 1).to_radians().cos();
        let expected_north = (south as f64 / ratio).floor() as i64;
        assert!((north - expected_north).abs() <= 1);
    }

    #[test]
    fn rows_neither_overlap_nor_gap() {
        let g = grid();
        let step = g.lat_step();
        for row in 0..g.n_rows() - 1 {
            let south_edge_of_next = g.row_center(row + 1) - step / 2.0;
            let north_edge = g.row_center(row) + step / 2.0;
            assert!((south_edge_of_next - north_edge).abs() < 1e-9);
        }
    }

    #[test]
    fn all_centers_stay_inside_the_bbox() {
        let g = grid();
        for t in g.tiles() {
            assert!(g.bbox().contains(t.lat, t.lon), "tile {} escaped", t.id);
        }
    }

    #[test]
    fn tiles_are_ordered_and_unique() {
        let g = grid();
        let tiles = g.tiles();
        let mut ids: Vec<&str> = tiles.iter().map(|t| t.id.as_str()).collect();
        let n = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), n);
        for pair in tiles.windows(2) {
            assert!((pair[0].row, pair[0].col) < (pair[1].row, pair[1].col));
        }
    }

    #[test]
    fn tile_for_point_inverts_tile_centers() {
        let g = grid();
        for t in g.tiles() {
            let found = g.tile_for_point(t.lat, t.lon).unwrap();
            assert_eq!(found.id, t.id);
        }
    }

    #[test]
    fn tile_for_point_outside_bbox_is_none() {
        let g = grid();
        assert!(g.tile_for_point(44.9, 9.5).is_none());
        assert!(g.tile_for_point(45.5, 14.1).is_none());
    }

    #[test]
    fn fractions_vanish_on_centers() {
        let g = grid();
        let t = &g.tiles()[3];
        assert!((g.row_fraction(t.lat) - t.row as f64).abs() < 1e-9);
        assert!((g.col_fraction(t.row, t.lon) - t.col as f64).abs() < 1e-9);
    }

    #[test]
    fn half_tile_bbox_has_no_rows() {
        let g = TileGrid::new(BoundingBox::new(45.0, 45.1, 9.0, 9.1), 50.0).unwrap();
        assert_eq!(g.n_rows(), 0);
        assert!(g.tiles().is_empty());
    }
}
