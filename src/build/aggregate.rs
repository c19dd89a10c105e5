//! Turns raw archive series into per-(month, day) climatology.
//!
//! Samples accumulate keyed by calendar day across every fetched year, then
//! collapse into one [`DayClimatology`] per day. All 366 day rows are
//! emitted for every tile, with statistics nulled wherever the backing
//! sample count is below the configured minimum.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};

use crate::build::archive::{DailyDay, HourlySample};
use crate::stats;
use crate::types::record::{DayClimatology, RidingHourClimatology};
use crate::types::tile::MonthDay;

// A per-date daytime mean needs at least this many hourly samples.
const MIN_HOURS_PER_DATE: usize = 2;

/// Aggregated output for one tile, ready to store.
#[derive(Debug, Clone, PartialEq)]
pub struct TileClimatology {
    pub days: Vec<(MonthDay, DayClimatology)>,
    pub hours: Vec<(MonthDay, RidingHourClimatology)>,
}

/// Collects archive samples for one tile across year chunks.
///
/// Accumulators are ordered maps so that two runs over the same input
/// produce bit-identical statistics regardless of fetch interleaving.
#[derive(Debug)]
pub struct TileAccumulator {
    riding_hours: Vec<u32>,
    temps: BTreeMap<MonthDay, Vec<f64>>,
    prcps: BTreeMap<MonthDay, Vec<f64>>,
    wind_speeds: BTreeMap<MonthDay, Vec<f64>>,
    wind_dirs: BTreeMap<MonthDay, Vec<f64>>,
    hour_temps: BTreeMap<(MonthDay, u32), Vec<f64>>,
    date_temps: BTreeMap<NaiveDate, Vec<f64>>,
}

impl TileAccumulator {
    pub fn new(riding_hours: &[u32]) -> Self {
        let mut riding_hours = riding_hours.to_vec();
        riding_hours.sort_unstable();
        riding_hours.dedup();
        TileAccumulator {
            riding_hours,
            temps: BTreeMap::new(),
            prcps: BTreeMap::new(),
            wind_speeds: BTreeMap::new(),
            wind_dirs: BTreeMap::new(),
            hour_temps: BTreeMap::new(),
            date_temps: BTreeMap::new(),
        }
    }

    pub fn add_daily(&mut self, days: &[DailyDay]) {
        for day in days {
            let md = MonthDay::from_date(day.date);
            if let Some(t) = day.temp_mean_c {
                self.temps.entry(md).or_default().push(t);
            }
            if let Some(p) = day.precip_sum_mm {
                self.prcps.entry(md).or_default().push(p);
            }
            if let Some(w) = day.wind_speed_kmh {
                self.wind_speeds.entry(md).or_default().push(w);
            }
            if let Some(d) = day.wind_dir_deg {
                self.wind_dirs.entry(md).or_default().push(d);
            }
        }
    }

    /// Keeps only samples whose local hour is a configured riding hour.
    pub fn add_hourly(&mut self, samples: &[HourlySample]) {
        for sample in samples {
            let hour = sample.time.hour();
            if !self.riding_hours.contains(&hour) {
                continue;
            }
            let Some(temp) = sample.temp_c else {
                continue;
            };
            let date = sample.time.date();
            self.hour_temps
                .entry((MonthDay::from_date(date), hour))
                .or_default()
                .push(temp);
            self.date_temps.entry(date).or_default().push(temp);
        }
    }

    /// Collapses the accumulated samples into day and riding-hour rows.
    ///
    /// Emits all 366 day rows and one riding-hour row per configured hour
    /// per day; each statistic family is nulled when its backing count is
    /// below `min_samples`, while the counts themselves are always kept.
    pub fn finalize(self, min_samples: usize, wet_day_mm: f64) -> TileClimatology {
        let TileAccumulator {
            riding_hours,
            mut temps,
            mut prcps,
            mut wind_speeds,
            mut wind_dirs,
            mut hour_temps,
            date_temps,
        } = self;

        // Per-date daytime means, grouped back onto their calendar day, and
        // the flat list of every riding-hour sample per calendar day.
        let mut day_means: BTreeMap<MonthDay, Vec<f64>> = BTreeMap::new();
        let mut day_samples: BTreeMap<MonthDay, Vec<f64>> = BTreeMap::new();
        for (date, samples) in &date_temps {
            let md = MonthDay::from_date(*date);
            day_samples
                .entry(md)
                .or_default()
                .extend(samples.iter().copied());
            if samples.len() >= MIN_HOURS_PER_DATE {
                if let Some(m) = stats::mean(samples) {
                    day_means.entry(md).or_default().push(m);
                }
            }
        }

        let mut days = Vec::with_capacity(366);
        let mut hours = Vec::new();
        for md in MonthDay::all() {
            let mut rec = DayClimatology::default();

            if let Some(mut t) = temps.remove(&md) {
                rec.samples_daily = t.len() as u32;
                if t.len() >= min_samples {
                    t.sort_by(f64::total_cmp);
                    rec.temperature_c = stats::median(&t);
                    rec.temp_p25 = stats::quantile(&t, 0.25);
                    rec.temp_p75 = stats::quantile(&t, 0.75);
                    rec.temp_std = stats::std_dev(&t);
                }
            }

            if let Some(p) = prcps.remove(&md) {
                rec.samples_rain = p.len() as u32;
                if p.len() >= min_samples {
                    let wet: Vec<f64> = p.iter().copied().filter(|&v| v > wet_day_mm).collect();
                    rec.precipitation_mm = stats::mean(&p);
                    rec.rain_probability = Some(wet.len() as f64 / p.len() as f64);
                    rec.rain_typical_mm = if wet.is_empty() {
                        Some(0.0)
                    } else {
                        stats::mean(&wet)
                    };
                }
            }

            if let Some(mut w) = wind_speeds.remove(&md) {
                if w.len() >= min_samples {
                    w.sort_by(f64::total_cmp);
                    // The archive serves wind in km/h.
                    rec.wind_speed_ms = stats::median(&w).map(|kmh| kmh / 3.6);
                }
            }
            if let Some(d) = wind_dirs.remove(&md) {
                rec.samples_wind = d.len() as u32;
                if d.len() >= min_samples {
                    if let Some(cs) = stats::circular_stats(&d) {
                        rec.wind_dir_deg = Some(cs.mean_deg);
                        rec.wind_var_deg = Some(cs.std_deg);
                    }
                }
            }

            if let Some(mut dm) = day_means.remove(&md) {
                rec.samples_day_means = dm.len() as u32;
                if dm.len() >= min_samples {
                    dm.sort_by(f64::total_cmp);
                    rec.temp_hist_p25 = stats::quantile(&dm, 0.25);
                    rec.temp_hist_p75 = stats::quantile(&dm, 0.75);
                    // Daytime means replace the whole 24h temperature family
                    // when hourly coverage allows.
                    rec.temperature_c = stats::median(&dm);
                    rec.temp_p25 = rec.temp_hist_p25;
                    rec.temp_p75 = rec.temp_hist_p75;
                    rec.temp_std = stats::std_dev(&dm);
                }
            }

            if let Some(mut all) = day_samples.remove(&md) {
                rec.samples_day_hours = all.len() as u32;
                if all.len() >= min_samples {
                    all.sort_by(f64::total_cmp);
                    rec.temp_day_median = stats::median(&all);
                    rec.temp_day_p25 = stats::quantile(&all, 0.25);
                    rec.temp_day_p75 = stats::quantile(&all, 0.75);
                }
            }

            days.push((md, rec));

            for &hour in &riding_hours {
                let mut samples = hour_temps.remove(&(md, hour)).unwrap_or_default();
                let mut row = RidingHourClimatology {
                    hour,
                    temp_median: None,
                    temp_p25: None,
                    temp_p75: None,
                    samples: samples.len() as u32,
                };
                if samples.len() >= min_samples {
                    samples.sort_by(f64::total_cmp);
                    row.temp_median = stats::median(&samples);
                    row.temp_p25 = stats::quantile(&samples, 0.25);
                    row.temp_p75 = stats::quantile(&samples, 0.75);
                }
                hours.push((md, row));
            }
        }

        TileClimatology { days, hours }
    }
}
