//! Pollutant → comparable concentration heuristic
//!
//! Converts station pollutant averages into a single CO2-like ppm figure so
//! that feeds reporting different pollutant mixes can be shown on one scale.
//! This is a planning/visualization proxy, not a chemical conversion.

/// Ambient level returned for an all-zero reading
pub const AMBIENT_PPM: f64 = 400.0;

/// Lower bound of the estimator's output range
pub const ESTIMATE_MIN: f64 = 350.0;

/// Upper bound of the estimator's output range
pub const ESTIMATE_MAX: f64 = 1200.0;

const W_PM25: f64 = 1.8;
const W_PM10: f64 = 0.4;
const W_NO2: f64 = 1.2;
const W_CO: f64 = 50.0;
const FACTOR_SCALE: f64 = 20.0;

/// Pollutant averages from one sensor record; absent values count as zero
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PollutantAverages {
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub no2: Option<f64>,
    pub co: Option<f64>,
}

impl PollutantAverages {
    /// A PM2.5-only reading
    pub fn pm25_only(pm25: f64) -> Self {
        Self {
            pm25: Some(pm25),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pm25.is_none() && self.pm10.is_none() && self.no2.is_none() && self.co.is_none()
    }

    pub fn estimate(&self) -> f64 {
        estimate(self.pm25, self.pm10, self.no2, self.co)
    }
}

/// Weighted, affine-scaled and clamped concentration estimate, rounded to
/// 2 decimals.
///
/// Monotonic non-decreasing in every input; `estimate(None, None, None, None)`
/// is exactly [`AMBIENT_PPM`].
pub fn estimate(pm25: Option<f64>, pm10: Option<f64>, no2: Option<f64>, co: Option<f64>) -> f64 {
    // Negative or non-finite readings are treated as missing
    let v = |x: Option<f64>| x.filter(|x| x.is_finite() && *x > 0.0).unwrap_or(0.0);
    let factor = v(pm25) * W_PM25 + v(pm10) * W_PM10 + v(no2) * W_NO2 + v(co) * W_CO;
    let est = (AMBIENT_PPM + factor / FACTOR_SCALE).clamp(ESTIMATE_MIN, ESTIMATE_MAX);
    round2(est)
}

/// Round to 2 decimals
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Round to 3 decimals
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
