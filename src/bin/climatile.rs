//! climatile CLI - build and inspect offline climatology tile stores.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use climatile::{
    BoundingBox, BuildProgress, BuildSpec, OceanPolicy, PacingSpec, Shard, StoreMeta, TileBuilder,
    TileStore, YearRange,
};

#[derive(Parser)]
#[command(
    name = "climatile",
    version,
    about = "Offline climatology tile store toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum OceanArg {
    /// Skip every sea tile
    Land,
    /// Keep sea tiles within --sea-km of land
    Coastal,
    /// Build everything
    All,
}

#[derive(Subcommand)]
enum Command {
    /// Build or resume a climatology store over a bounding box
    Build {
        /// Store file to create or resume
        #[arg(long, default_value = "climatology.sqlite")]
        db: PathBuf,

        /// Southern edge in degrees
        #[arg(long, default_value_t = 34.0)]
        lat_min: f64,

        /// Northern edge in degrees
        #[arg(long, default_value_t = 72.0)]
        lat_max: f64,

        /// Western edge in degrees
        #[arg(long, default_value_t = -11.0)]
        lon_min: f64,

        /// Eastern edge in degrees
        #[arg(long, default_value_t = 33.0)]
        lon_max: f64,

        /// Tile edge length in kilometers
        #[arg(long, default_value_t = 50.0)]
        tile_km: f64,

        /// Which sea tiles to build
        #[arg(long, value_enum, default_value_t = OceanArg::Coastal)]
        ocean: OceanArg,

        /// Coastal band width in kilometers, used with --ocean coastal
        #[arg(long, default_value_t = 50.0)]
        sea_km: f64,

        /// Land mask file; without one, ocean filtering is skipped
        #[arg(long)]
        land_mask: Option<PathBuf>,

        /// First year of history; defaults to the last complete decade
        #[arg(long)]
        start_year: Option<i32>,

        /// Last year of history; goes together with --start-year
        #[arg(long)]
        end_year: Option<i32>,

        /// Years fetched per archive request
        #[arg(long, default_value_t = 2)]
        chunk_years: u32,

        /// This process's shard of the tile list
        #[arg(long, default_value_t = 0)]
        chunk_index: usize,

        /// Total number of shards building this store
        #[arg(long, default_value_t = 1)]
        chunk_count: usize,

        /// Minimum seconds between archive requests
        #[arg(long, default_value_t = 1.15)]
        min_interval: f64,

        /// RFC 3339 instant to finish by; request pacing stretches to fill it
        #[arg(long)]
        deadline: Option<String>,

        /// Stop after this many tiles, for test runs
        #[arg(long)]
        max_tiles: Option<usize>,

        /// Rebuild tiles that are already done
        #[arg(long)]
        force: bool,
    },

    /// Print build progress and store settings as JSON
    Status {
        /// Store file to inspect
        #[arg(long, default_value = "climatology.sqlite")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Build {
            db,
            lat_min,
            lat_max,
            lon_min,
            lon_max,
            tile_km,
            ocean,
            sea_km,
            land_mask,
            start_year,
            end_year,
            chunk_years,
            chunk_index,
            chunk_count,
            min_interval,
            deadline,
            max_tiles,
            force,
        } => {
            let years = match (start_year, end_year) {
                (None, None) => YearRange::last_decade(),
                (Some(start), Some(end)) => YearRange::new(start, end),
                _ => bail!("--start-year and --end-year go together"),
            };
            let ocean = match ocean {
                OceanArg::Land => OceanPolicy::Land,
                OceanArg::Coastal => OceanPolicy::Coastal { sea_km },
                OceanArg::All => OceanPolicy::All,
            };
            let deadline = deadline
                .map(|raw| {
                    DateTime::parse_from_rfc3339(&raw).map(|instant| instant.with_timezone(&Utc))
                })
                .transpose()
                .context("--deadline is not an RFC 3339 instant")?;

            let spec = BuildSpec {
                bbox: BoundingBox::new(lat_min, lat_max, lon_min, lon_max),
                tile_km,
                ocean,
                land_mask,
                years,
                chunk_years,
                shard: Shard {
                    index: chunk_index,
                    count: chunk_count,
                },
                max_tiles,
                force,
                ..BuildSpec::default()
            };
            let pacing = PacingSpec {
                min_interval: Duration::from_secs_f64(min_interval),
                deadline,
            };

            let store = TileStore::open(&db)?;
            let builder = TileBuilder::builder()
                .spec(spec)
                .store(store)
                .pacing(pacing)
                .build()?;
            let summary = builder.run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Status { db } => status(&db),
    }
}

#[derive(Serialize)]
struct StatusReport {
    meta: StoreMeta,
    progress: BuildProgress,
    tiles: usize,
}

fn status(db: &std::path::Path) -> anyhow::Result<()> {
    let store = TileStore::open(db)?;
    let report = StatusReport {
        meta: store.read_meta()?,
        progress: store.build_progress()?,
        tiles: store.tile_count()?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
