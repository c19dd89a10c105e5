//! Request pacing for archive fetches.
//!
//! Two mechanisms share one limiter: a minimum interval between requests,
//! stretched whenever the server answers HTTP 429, and an optional
//! wall-clock deadline for the whole run. The deadline is converted into a
//! per-request interval from the remaining request budget before every
//! tile, so skipped and failed tiles give their time back to the tiles
//! still to come.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use tokio::time::Instant;

/// Lower bound on the request interval.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(250);
/// Upper bound on the request interval.
pub const MAX_REQUEST_INTERVAL: Duration = Duration::from_secs(30);

const DEADLINE_HEADROOM: f64 = 0.90;
const PUSHBACK_FACTOR: f64 = 1.35;

/// Spaces archive requests at least one interval apart.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    floor: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        RateLimiter {
            interval,
            floor: Duration::ZERO,
            last_request: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Re-targets the interval, e.g. from the deadline budget. The interval
    /// never drops below what 429 pushback has raised it to.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.clamp(self.floor, MAX_REQUEST_INTERVAL);
    }

    /// Stretches the interval after HTTP 429. Later `set_interval` calls
    /// cannot undo the stretch.
    pub fn bump(&mut self) {
        let stretched = self
            .interval
            .mul_f64(PUSHBACK_FACTOR)
            .min(MAX_REQUEST_INTERVAL);
        self.interval = stretched;
        self.floor = self.floor.max(stretched);
        info!(
            "Rate limited; request interval now {:.2}s",
            self.interval.as_secs_f64()
        );
    }

    /// Sleeps until one interval has passed since the previous request,
    /// then claims the new slot.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let next = last + self.interval;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// Interval that spreads `remaining_requests` evenly over the time left
/// until `deadline`, with 10% headroom, clamped to
/// [`MIN_REQUEST_INTERVAL`]..=[`MAX_REQUEST_INTERVAL`].
///
/// A deadline that has already passed clamps to the floor rather than
/// aborting the run.
pub fn deadline_interval(
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
    remaining_requests: usize,
) -> Duration {
    if remaining_requests == 0 {
        return MIN_REQUEST_INTERVAL;
    }
    let remaining_s = (deadline - now).num_milliseconds() as f64 / 1000.0;
    let per_request = if remaining_s > 0.0 {
        remaining_s * DEADLINE_HEADROOM / remaining_requests as f64
    } else {
        0.0
    };
    Duration::from_secs_f64(per_request.clamp(
        MIN_REQUEST_INTERVAL.as_secs_f64(),
        MAX_REQUEST_INTERVAL.as_secs_f64(),
    ))
}
