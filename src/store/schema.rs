/// Returns the SQL statements that create the tile store schema.
///
/// Tables:
/// - `meta` - key/value pairs describing how the store was built
/// - `tiles` - tile centers and their grid coordinates
/// - `climatology` - per-(tile, month, day) aggregated statistics
/// - `riding_hourly` - per-(tile, month, day, hour) temperature quartiles
/// - `build_state` - per-tile pipeline status for restartable builds
///
/// Every statement uses `IF NOT EXISTS`, so running the batch against an
/// existing store is a no-op.
pub fn create_schema() -> &'static str {
    r#"
    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tiles (
        tile_id TEXT PRIMARY KEY,
        row     INTEGER NOT NULL,
        col     INTEGER NOT NULL,
        lat     REAL NOT NULL,
        lon     REAL NOT NULL
    );

    CREATE TABLE IF NOT EXISTS climatology (
        tile_id          TEXT NOT NULL,
        month            INTEGER NOT NULL,
        day              INTEGER NOT NULL,
        temperature_c    REAL,
        temp_p25         REAL,
        temp_p75         REAL,
        temp_std         REAL,
        precipitation_mm REAL,
        rain_probability REAL,
        rain_typical_mm  REAL,
        wind_speed_ms    REAL,
        wind_dir_deg     REAL,
        wind_var_deg     REAL,
        temp_hist_p25    REAL,
        temp_hist_p75    REAL,
        temp_day_p25     REAL,
        temp_day_p75     REAL,
        temp_day_median  REAL,
        samples_daily    INTEGER NOT NULL DEFAULT 0,
        samples_rain     INTEGER NOT NULL DEFAULT 0,
        samples_wind     INTEGER NOT NULL DEFAULT 0,
        samples_day_means INTEGER NOT NULL DEFAULT 0,
        samples_day_hours INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (tile_id, month, day)
    );

    CREATE TABLE IF NOT EXISTS riding_hourly (
        tile_id     TEXT NOT NULL,
        month       INTEGER NOT NULL,
        day         INTEGER NOT NULL,
        hour        INTEGER NOT NULL,
        temp_median REAL,
        temp_p25    REAL,
        temp_p75    REAL,
        samples     INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (tile_id, month, day, hour)
    );

    CREATE TABLE IF NOT EXISTS build_state (
        tile_id    TEXT PRIMARY KEY,
        status     TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        error      TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_climatology_month_day
        ON climatology (month, day);

    CREATE INDEX IF NOT EXISTS idx_riding_hourly_month_day
        ON riding_hourly (month, day);
    "#
}
