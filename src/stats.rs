//! Shared numeric primitives for the aggregation and interpolation layers.
//!
//! Wind directions are angular data: 350° and 10° average to ≈0°, not 180°.
//! Every place that combines directions goes through [`circular_stats`] or
//! [`lerp_angle_deg`] so the unit-vector math lives in exactly one spot.

/// Circular summary of a set of directions in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircularStats {
    /// Mean direction in `[0, 360)`.
    pub mean_deg: f64,
    /// Mean resultant length in `[0, 1]`; 1 means all directions agree.
    pub resultant: f64,
    /// Circular standard deviation in degrees, capped at 180.
    pub std_deg: f64,
}

/// Linearly interpolated quantile of an ascending-sorted slice.
///
/// `q` is in `[0, 1]`; out-of-range values are clamped. Returns `None` for
/// an empty slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Median of an ascending-sorted slice.
pub fn median(sorted: &[f64]) -> Option<f64> {
    quantile(sorted, 0.5)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Circular mean, resultant length and circular std of directions in degrees.
///
/// The std follows `sqrt(-2 ln R)` converted to degrees and is capped at
/// 180°; a fully dispersed set (R ≈ 0) reports exactly 180°.
pub fn circular_stats(directions_deg: &[f64]) -> Option<CircularStats> {
    if directions_deg.is_empty() {
        return None;
    }
    let n = directions_deg.len() as f64;
    let mut sin_sum = 0.0;
    let mut cos_sum = 0.0;
    for d in directions_deg {
        let r = d.to_radians();
        sin_sum += r.sin();
        cos_sum += r.cos();
    }
    let mean_sin = sin_sum / n;
    let mean_cos = cos_sum / n;
    let mean_deg = mean_sin.atan2(mean_cos).to_degrees().rem_euclid(360.0);
    // Float error can push R a hair past 1 for identical inputs.
    let resultant = (mean_sin * mean_sin + mean_cos * mean_cos).sqrt().clamp(0.0, 1.0);
    let std_deg = if resultant <= 0.0 {
        180.0
    } else {
        (-2.0 * resultant.ln()).sqrt().to_degrees().min(180.0)
    };
    Some(CircularStats {
        mean_deg,
        resultant,
        std_deg,
    })
}

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Interpolates between two directions along the shorter arc by blending
/// unit vectors and re-deriving the angle. Result is in `[0, 360)`.
pub fn lerp_angle_deg(a_deg: f64, b_deg: f64, t: f64) -> f64 {
    let a = a_deg.to_radians();
    let b = b_deg.to_radians();
    let s = lerp(a.sin(), b.sin(), t);
    let c = lerp(a.cos(), b.cos(), t);
    s.atan2(c).to_degrees().rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<f64>) -> Vec<f64> {
        v.sort_by(|a, b| a.total_cmp(b));
        v
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let v = sorted(vec![4.0, 1.0, 3.0, 2.0]);
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
        assert_eq!(quantile(&v, 0.5), Some(2.5));
        assert_eq!(quantile(&v, 0.25), Some(1.75));
        assert_eq!(quantile(&v, 0.75), Some(3.25));
    }

    #[test]
    fn quantile_of_empty_is_none() {
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(median(&[]), None);
        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[]), None);
    }

    #[test]
    fn median_of_single_value() {
        assert_eq!(median(&[7.5]), Some(7.5));
    }

    #[test]
    fn std_dev_matches_population_formula() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let s = std_dev(&v).unwrap();
        assert!((s - 2.0).abs() < 1e-12);
    }

    #[test]
    fn circular_mean_handles_wraparound() {
        let stats = circular_stats(&[350.0, 10.0]).unwrap();
        let deviation = (stats.mean_deg - 0.0).abs().min((stats.mean_deg - 360.0).abs());
        assert!(deviation < 1.0, "mean was {}", stats.mean_deg);
        assert!(stats.resultant > 0.9);
    }

    #[test]
    fn circular_std_is_zero_for_identical_directions() {
        let stats = circular_stats(&[90.0, 90.0, 90.0]).unwrap();
        assert!((stats.mean_deg - 90.0).abs() < 1e-9);
        assert!(stats.std_deg < 1e-6);
    }

    #[test]
    fn circular_std_caps_at_180_when_fully_dispersed() {
        let stats = circular_stats(&[0.0, 90.0, 180.0, 270.0]).unwrap();
        assert_eq!(stats.std_deg, 180.0);
    }

    #[test]
    fn circular_stats_of_empty_is_none() {
        assert_eq!(circular_stats(&[]), None);
    }

    #[test]
    fn angle_lerp_midpoint_crosses_north() {
        let mid = lerp_angle_deg(350.0, 10.0, 0.5);
        let deviation = mid.min(360.0 - mid);
        assert!(deviation < 1.0, "midpoint was {}", mid);
    }

    #[test]
    fn angle_lerp_endpoints_are_exact() {
        assert!((lerp_angle_deg(350.0, 10.0, 0.0) - 350.0).abs() < 1e-9);
        assert!((lerp_angle_deg(350.0, 10.0, 1.0) - 10.0).abs() < 1e-9);
    }
}
