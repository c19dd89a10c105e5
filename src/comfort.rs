//! On-demand comfort scoring over day climatology.
//!
//! Scores are computed at query time from stored statistics, never
//! persisted, so profiles can be tuned without rebuilding a store. Each
//! component maps a statistic onto `[0, 1]` and the composite is their
//! weighted product: one bad component sinks the day even when the others
//! are perfect.

use crate::types::record::DayClimatology;

/// Which stored precipitation statistic feeds the rain score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecipField {
    /// Mean over all sampled days.
    #[default]
    Mean,
    /// Mean over wet days only.
    Typical,
}

/// Tunable comfort model.
///
/// Temperature scores 1.0 inside `[cold_c, hot_c]` and ramps linearly to
/// zero over the falloff widths on each side. Rain and wind score 1.0 at
/// zero and reach zero at twice their ceiling, putting the ceiling itself
/// at 0.5. The weights are exponents on the components.
#[derive(Debug, Clone, PartialEq)]
pub struct ComfortProfile {
    pub cold_c: f64,
    pub hot_c: f64,
    pub cold_falloff_c: f64,
    pub hot_falloff_c: f64,
    pub rain_ceiling_mm: f64,
    pub wind_ceiling_ms: f64,
    pub precip_field: PrecipField,
    pub temp_weight: f64,
    pub rain_weight: f64,
    pub wind_weight: f64,
}

/// Component and composite scores for one day, all in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComfortScore {
    pub temp: f64,
    pub rain: f64,
    pub wind: f64,
    pub total: f64,
}

impl ComfortProfile {
    /// Motorcycle riding: comfortable between 15 and 25 °C with narrow
    /// falloffs, sensitive to rain and headwind-grade wind.
    pub fn riding() -> Self {
        ComfortProfile {
            cold_c: 15.0,
            hot_c: 25.0,
            cold_falloff_c: 5.0,
            hot_falloff_c: 5.0,
            rain_ceiling_mm: 1.0,
            wind_ceiling_ms: 6.0,
            precip_field: PrecipField::Mean,
            temp_weight: 1.0,
            rain_weight: 1.0,
            wind_weight: 1.0,
        }
    }

    /// Tent camping: wider temperature band, judged on rain actually
    /// falling on wet days rather than the all-day mean.
    pub fn camping() -> Self {
        ComfortProfile {
            cold_c: 12.0,
            hot_c: 28.0,
            cold_falloff_c: 8.0,
            hot_falloff_c: 8.0,
            rain_ceiling_mm: 1.0,
            wind_ceiling_ms: 8.0,
            precip_field: PrecipField::Typical,
            ..Self::riding()
        }
    }

    /// Scores a stored day record.
    ///
    /// Returns `None` when any required input statistic is missing; a thin
    /// store yields no score rather than a misleading one.
    pub fn score(&self, record: &DayClimatology) -> Option<ComfortScore> {
        let temp = record.temperature_c?;
        let rain = match self.precip_field {
            PrecipField::Mean => record.precipitation_mm?,
            PrecipField::Typical => record.rain_typical_mm?,
        };
        let wind = record.wind_speed_ms?;
        Some(self.score_values(temp, rain, wind))
    }

    /// Scores raw values directly.
    pub fn score_values(&self, temp_c: f64, rain_mm: f64, wind_ms: f64) -> ComfortScore {
        let temp = self.temp_score(temp_c);
        let rain = headroom_score(rain_mm, self.rain_ceiling_mm);
        let wind = headroom_score(wind_ms, self.wind_ceiling_ms);
        let total =
            temp.powf(self.temp_weight) * rain.powf(self.rain_weight) * wind.powf(self.wind_weight);
        ComfortScore {
            temp,
            rain,
            wind,
            total,
        }
    }

    fn temp_score(&self, t: f64) -> f64 {
        if t < self.cold_c {
            (1.0 - (self.cold_c - t) / self.cold_falloff_c).clamp(0.0, 1.0)
        } else if t > self.hot_c {
            (1.0 - (t - self.hot_c) / self.hot_falloff_c).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

impl Default for ComfortProfile {
    fn default() -> Self {
        Self::riding()
    }
}

fn headroom_score(value: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        return if value > 0.0 { 0.0 } else { 1.0 };
    }
    (1.0 - value / (2.0 * ceiling)).clamp(0.0, 1.0)
}

/// Signed wind component along a travel heading, m/s.
///
/// `from_deg` is the direction the wind blows from; positive results push
/// the traveller forward (tailwind), negative ones oppose (headwind).
pub fn effective_wind_ms(speed_ms: f64, from_deg: f64, heading_deg: f64) -> f64 {
    let toward = from_deg + 180.0;
    speed_ms * (toward - heading_deg).to_radians().cos()
}
