//! Open-Meteo historical archive client.
//!
//! The archive serves per-point historical series; fetches are chunked into
//! year spans to keep response sizes bounded. All access goes through the
//! [`ArchiveSource`] trait so the pipeline can run against synthetic series
//! in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bon::bon;
use chrono::{NaiveDate, NaiveDateTime};
use log::warn;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::build::error::ArchiveError;
use crate::build::pacing::RateLimiter;

/// Production archive endpoint.
pub const OPEN_METEO_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1150);
const DAILY_FIELDS: &str =
    "temperature_2m_mean,precipitation_sum,windspeed_10m_mean,winddirection_10m_dominant";
// The archive formats hourly timestamps without seconds.
const HOURLY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

const RETRY_DELAYS_S: [u64; 6] = [2, 5, 10, 20, 40, 80];
const RETRYABLE_STATUS: [u16; 4] = [500, 502, 503, 504];

/// One day of daily aggregates at a point. Any field the archive had no
/// data for is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyDay {
    pub date: NaiveDate,
    pub temp_mean_c: Option<f64>,
    pub precip_sum_mm: Option<f64>,
    /// Daily mean wind speed as served, km/h.
    pub wind_speed_kmh: Option<f64>,
    /// Dominant wind direction, degrees the wind blows from.
    pub wind_dir_deg: Option<f64>,
}

/// One hourly air temperature sample in the point's local time.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlySample {
    pub time: NaiveDateTime,
    pub temp_c: Option<f64>,
}

/// Source of historical weather series for one point.
///
/// Implemented by [`OpenMeteoArchive`] in production; tests substitute
/// synthetic generators.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Daily aggregates for `start..=end`, UTC days.
    async fn daily(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyDay>, ArchiveError>;

    /// Hourly air temperatures for `start..=end`, timestamps in the point's
    /// local time zone.
    async fn hourly(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HourlySample>, ArchiveError>;
}

/// HTTP client for the Open-Meteo archive with pacing and bounded retry.
///
/// Transient failures (timeouts, connection errors, HTTP 429/500/502/503/504)
/// are retried on a fixed backoff ladder; a 429 additionally stretches the
/// shared request interval for the rest of the run.
pub struct OpenMeteoArchive {
    client: Client,
    base_url: String,
    limiter: Arc<Mutex<RateLimiter>>,
}

#[bon]
impl OpenMeteoArchive {
    /// Creates a new archive client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Endpoint override, defaults to the public archive.
    /// * `timeout` - Per-request timeout, defaults to 90 seconds.
    /// * `min_interval` - Initial pacing interval, defaults to 1.15 seconds.
    /// * `limiter` - Shared limiter; passing one lets the build pipeline
    ///   re-target the pacing interval between tiles. Takes precedence over
    ///   `min_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Network`] if the HTTP client cannot be
    /// constructed.
    #[builder]
    pub fn new(
        base_url: Option<String>,
        timeout: Option<Duration>,
        min_interval: Option<Duration>,
        limiter: Option<Arc<Mutex<RateLimiter>>>,
    ) -> Result<Self, ArchiveError> {
        let client = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;
        let limiter = limiter.unwrap_or_else(|| {
            Arc::new(Mutex::new(RateLimiter::new(
                min_interval.unwrap_or(DEFAULT_MIN_INTERVAL),
            )))
        });
        Ok(OpenMeteoArchive {
            client,
            base_url: base_url.unwrap_or_else(|| OPEN_METEO_ARCHIVE_URL.to_string()),
            limiter,
        })
    }

    fn daily_url(&self, lat: f64, lon: f64, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}?latitude={lat:.6}&longitude={lon:.6}&start_date={start}&end_date={end}\
             &daily={DAILY_FIELDS}&timezone=UTC",
            self.base_url
        )
    }

    fn hourly_url(&self, lat: f64, lon: f64, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}?latitude={lat:.6}&longitude={lon:.6}&start_date={start}&end_date={end}\
             &hourly=temperature_2m&timezone=auto",
            self.base_url
        )
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ArchiveError> {
        let max_attempts = RETRY_DELAYS_S.len() + 1;
        let mut attempt = 0;
        loop {
            self.limiter.lock().await.wait().await;
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(err) if (err.is_timeout() || err.is_connect()) && attempt + 1 < max_attempts => {
                    let delay = retry_delay(attempt, false);
                    warn!(
                        "Archive request failed ({err}); retrying in {:.2}s",
                        delay.as_secs_f64()
                    );
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Err(err) => return Err(ArchiveError::Network(err)),
            };
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                self.limiter.lock().await.bump();
                if attempt + 1 >= max_attempts {
                    return Err(ArchiveError::RateLimited {
                        attempts: max_attempts,
                    });
                }
                sleep(retry_delay(attempt, true)).await;
                attempt += 1;
                continue;
            }
            if RETRYABLE_STATUS.contains(&status.as_u16()) && attempt + 1 < max_attempts {
                let delay = retry_delay(attempt, false);
                warn!(
                    "Archive returned HTTP {status}; retrying in {:.2}s",
                    delay.as_secs_f64()
                );
                sleep(delay).await;
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                return Err(ArchiveError::Status {
                    status: status.as_u16(),
                    url,
                });
            }
            return response
                .json::<T>()
                .await
                .map_err(|source| ArchiveError::Decode { url, source });
        }
    }
}

#[async_trait]
impl ArchiveSource for OpenMeteoArchive {
    async fn daily(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyDay>, ArchiveError> {
        let url = self.daily_url(lat, lon, start, end);
        let response: DailyResponse = self.fetch_json(url).await?;
        Ok(response.daily.map(daily_days).unwrap_or_default())
    }

    async fn hourly(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<HourlySample>, ArchiveError> {
        let url = self.hourly_url(lat, lon, start, end);
        let response: HourlyResponse = self.fetch_json(url).await?;
        match response.hourly {
            Some(block) => hourly_samples(block),
            None => Ok(Vec::new()),
        }
    }
}

// --- Response decoding ---

#[derive(Debug, Deserialize)]
struct DailyResponse {
    daily: Option<DailyBlock>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    #[serde(default)]
    time: Vec<NaiveDate>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    windspeed_10m_mean: Vec<Option<f64>>,
    #[serde(default)]
    winddirection_10m_dominant: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
}

fn daily_days(block: DailyBlock) -> Vec<DailyDay> {
    warn_on_length_mismatch(
        "daily",
        block.time.len(),
        &[
            block.temperature_2m_mean.len(),
            block.precipitation_sum.len(),
            block.windspeed_10m_mean.len(),
            block.winddirection_10m_dominant.len(),
        ],
    );
    block
        .time
        .iter()
        .enumerate()
        .map(|(i, &date)| DailyDay {
            date,
            temp_mean_c: value_at(&block.temperature_2m_mean, i),
            precip_sum_mm: value_at(&block.precipitation_sum, i),
            wind_speed_kmh: value_at(&block.windspeed_10m_mean, i),
            wind_dir_deg: value_at(&block.winddirection_10m_dominant, i),
        })
        .collect()
}

fn hourly_samples(block: HourlyBlock) -> Result<Vec<HourlySample>, ArchiveError> {
    warn_on_length_mismatch("hourly", block.time.len(), &[block.temperature_2m.len()]);
    let mut samples = Vec::with_capacity(block.time.len());
    for (i, raw) in block.time.iter().enumerate() {
        let time = NaiveDateTime::parse_from_str(raw, HOURLY_TIME_FORMAT)
            .map_err(|_| ArchiveError::Timestamp(raw.clone()))?;
        samples.push(HourlySample {
            time,
            temp_c: value_at(&block.temperature_2m, i),
        });
    }
    Ok(samples)
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

fn warn_on_length_mismatch(kind: &str, times: usize, value_lens: &[usize]) {
    if value_lens.iter().any(|&len| len != 0 && len != times) {
        warn!(
            "Archive {kind} series lengths disagree with the time axis; \
             extra values are dropped and short series read as gaps"
        );
    }
}

fn retry_delay(attempt: usize, rate_limited: bool) -> Duration {
    let base = RETRY_DELAYS_S[attempt.min(RETRY_DELAYS_S.len() - 1)] as f64;
    // Deterministic jitter keeps parallel shards from retrying in lockstep.
    let jitter = if rate_limited {
        0.25 * (1.0 + (attempt % 3) as f64)
    } else {
        0.0
    };
    Duration::from_secs_f64(base + jitter)
}
