use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// One cell of the climatology mesh.
///
/// `row` indexes the latitude band, `col` the longitude position within
/// that band. Column counts differ between bands because the longitude
/// step depends on latitude, so `col` is only meaningful together with
/// `row`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: String,
    pub row: i64,
    pub col: i64,
    /// Center latitude of the cell.
    pub lat: f64,
    /// Center longitude of the cell.
    pub lon: f64,
}

impl Tile {
    pub fn new(row: i64, col: i64, lat: f64, lon: f64) -> Self {
        Tile {
            id: tile_id(row, col),
            row,
            col,
            lat,
            lon,
        }
    }
}

/// Deterministic tile identifier for a (row, col) pair.
pub fn tile_id(row: i64, col: i64) -> String {
    format!("r{row}_c{col}")
}

// Leap year, so Feb 29 exists when enumerating every calendar day.
const REFERENCE_YEAR: i32 = 2020;

/// A calendar day without a year.
///
/// Climatology is keyed by `(month, day)` rather than day-of-year so that
/// Feb 29 stays aligned across leap and non-leap years.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    /// Returns `None` for days that exist in no year (e.g. Feb 30).
    /// Feb 29 is valid.
    pub fn new(month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(REFERENCE_YEAR, month, day)?;
        Some(MonthDay { month, day })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        MonthDay {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// All 366 calendar days in order, Jan 1 through Dec 31.
    pub fn all() -> impl Iterator<Item = MonthDay> {
        (1..=366u32).filter_map(|ordinal| {
            NaiveDate::from_yo_opt(REFERENCE_YEAR, ordinal).map(MonthDay::from_date)
        })
    }
}

impl std::fmt::Display for MonthDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}
