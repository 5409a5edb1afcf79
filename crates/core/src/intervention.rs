//! Intervention effect model
//!
//! Translates a station's environmental covariates, the planner's efficiency
//! lever and an optional weather scenario into a bounded fractional
//! reduction of its concentration.
//!
//! ```text
//! ratio = min(0.3, 0.3 · (0.6·ndvi + 0.3·albedo) / lulc_factor)
//! ratio *= efficiency / 50                      (if given)
//! ratio *= stagnation · wind · mixing height    (if weather given)
//! ratio  = clamp(ratio, 0, 0.5)
//! after  = base · (1 - ratio)
//! ```

use crate::core_types::units::MetersPerSecond;
use crate::estimator::round2;
use crate::store::{sanitize, ResolvedStore};
use crate::weather::{DispersionClass, WeatherSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Ceiling of the environment-driven ratio
pub const MAX_ENVIRONMENTAL_RATIO: f64 = 0.3;

/// Hard ceiling of the final ratio
pub const MAX_RATIO: f64 = 0.5;

/// Efficiency at which the environmental ratio applies in full (percent)
pub const MAX_EFFICIENCY: f64 = 50.0;

/// Valid range of the LULC urbanization factor
pub const LULC_FACTOR_RANGE: (f64, f64) = (0.1, 3.0);

/// How stagnant the air over a station is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagnationLevel {
    High,
    Elevated,
    #[default]
    Normal,
    Low,
}

impl StagnationLevel {
    /// Parse a label; anything unrecognized is `Normal`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => StagnationLevel::High,
            "elevated" | "medium" => StagnationLevel::Elevated,
            "low" => StagnationLevel::Low,
            _ => StagnationLevel::Normal,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            StagnationLevel::High => 1.20,
            StagnationLevel::Elevated => 1.10,
            StagnationLevel::Normal => 1.00,
            StagnationLevel::Low => 0.90,
        }
    }
}

impl From<DispersionClass> for StagnationLevel {
    fn from(class: DispersionClass) -> Self {
        match class {
            DispersionClass::Poor => StagnationLevel::High,
            DispersionClass::Moderate => StagnationLevel::Normal,
            DispersionClass::Good => StagnationLevel::Low,
        }
    }
}

/// Weather conditions modulating an intervention
///
/// Each present field contributes an independent multiplier; absent fields
/// contribute 1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherScenario {
    pub stagnation: Option<StagnationLevel>,
    pub wind_speed: Option<MetersPerSecond>,
    pub mixing_height_m: Option<f64>,
}

impl WeatherScenario {
    /// Scenario implied by a live weather snapshot.
    pub fn from_snapshot(snapshot: &WeatherSnapshot) -> Self {
        Self {
            stagnation: Some(snapshot.dispersion.into()),
            wind_speed: Some(snapshot.wind_speed),
            mixing_height_m: snapshot.mixing_height_m,
        }
    }

    /// Product of the stagnation, wind and mixing-height factors.
    pub fn multiplier(&self) -> f64 {
        let stagnation = self.stagnation.map_or(1.0, |s| s.multiplier());
        let wind = match self.wind_speed {
            Some(w) if *w < 1.5 => 1.05,
            Some(w) if *w > 5.0 => 0.90,
            _ => 1.0,
        };
        let mixing = match self.mixing_height_m {
            Some(h) if h.is_finite() && h < 500.0 => 1.05,
            Some(h) if h.is_finite() && h > 900.0 => 0.92,
            _ => 1.0,
        };
        stagnation * wind * mixing
    }
}

/// Result of [`intervention_effect`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InterventionEffect {
    /// Fraction of the base concentration removed, `[0, 0.5]`
    pub ratio: f64,
    /// Sanitized concentration after the intervention
    pub reduced: f64,
}

/// Compute the bounded reduction for one station.
///
/// Covariates are clamped into range; a non-finite efficiency is ignored.
pub fn intervention_effect(
    base: f64,
    ndvi: f64,
    albedo: f64,
    lulc_factor: f64,
    efficiency: Option<f64>,
    weather: Option<&WeatherScenario>,
) -> InterventionEffect {
    let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let ndvi = unit(ndvi);
    let albedo = unit(albedo);
    let lulc_factor = if lulc_factor.is_finite() {
        lulc_factor.clamp(LULC_FACTOR_RANGE.0, LULC_FACTOR_RANGE.1)
    } else {
        LULC_FACTOR_RANGE.1
    };

    let env_score = (0.6 * ndvi + 0.3 * albedo) / lulc_factor;
    let mut ratio = (env_score * MAX_ENVIRONMENTAL_RATIO).min(MAX_ENVIRONMENTAL_RATIO);

    if let Some(eff) = efficiency.filter(|e| e.is_finite()) {
        ratio *= eff.clamp(0.0, MAX_EFFICIENCY) / MAX_EFFICIENCY;
    }
    if let Some(scenario) = weather {
        ratio *= scenario.multiplier();
    }
    let ratio = ratio.clamp(0.0, MAX_RATIO);

    InterventionEffect {
        ratio,
        reduced: sanitize(base * (1.0 - ratio)),
    }
}

/// One applied intervention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterventionRecord {
    pub station: String,
    pub city: String,
    pub method: String,
    pub applied_to: ResolvedStore,
    pub before: f64,
    pub after: f64,
    pub ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherScenario>,
    pub applied_at: DateTime<Utc>,
}

impl InterventionRecord {
    /// Absolute reduction (ppm)
    pub fn delta(&self) -> f64 {
        round2(self.before - self.after)
    }
}

/// Append-only in-memory intervention history
#[derive(Debug, Default)]
pub struct InterventionLog {
    records: Mutex<Vec<InterventionRecord>>,
}

impl InterventionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: InterventionRecord) {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(record);
    }

    /// Copy of every record, oldest first.
    pub fn snapshot(&self) -> Vec<InterventionRecord> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_urban_station_scenario() {
        let effect = intervention_effect(450.0, 0.3, 0.15, 2.0, Some(50.0), None);
        assert_relative_eq!(effect.ratio, 0.03375, epsilon = 1e-12);
        assert_eq!(effect.reduced, 434.81);
    }

    #[test]
    fn test_environmental_ratio_capped() {
        let effect = intervention_effect(1000.0, 1.0, 1.0, 0.1, None, None);
        assert_eq!(effect.ratio, MAX_ENVIRONMENTAL_RATIO);
        assert_eq!(effect.reduced, 700.0);
    }

    #[test]
    fn test_efficiency_scaling() {
        let full = intervention_effect(800.0, 0.4, 0.2, 1.0, None, None);
        let at_50 = intervention_effect(800.0, 0.4, 0.2, 1.0, Some(50.0), None);
        let at_0 = intervention_effect(800.0, 0.4, 0.2, 1.0, Some(0.0), None);
        let at_25 = intervention_effect(800.0, 0.4, 0.2, 1.0, Some(25.0), None);
        let over = intervention_effect(800.0, 0.4, 0.2, 1.0, Some(90.0), None);
        let nan = intervention_effect(800.0, 0.4, 0.2, 1.0, Some(f64::NAN), None);

        assert_eq!(at_50.ratio, full.ratio);
        assert_eq!(at_0.ratio, 0.0);
        assert_eq!(at_0.reduced, 800.0);
        assert_relative_eq!(at_25.ratio, full.ratio / 2.0, epsilon = 1e-12);
        assert_eq!(over.ratio, full.ratio);
        assert_eq!(nan.ratio, full.ratio);
    }

    #[test]
    fn test_weather_factors_compose() {
        let scenario = WeatherScenario {
            stagnation: Some(StagnationLevel::High),
            wind_speed: Some(MetersPerSecond::new(1.0)),
            mixing_height_m: Some(300.0),
        };
        assert_relative_eq!(scenario.multiplier(), 1.20 * 1.05 * 1.05, epsilon = 1e-12);

        let clean = WeatherScenario {
            stagnation: Some(StagnationLevel::Low),
            wind_speed: Some(MetersPerSecond::new(8.0)),
            mixing_height_m: Some(1500.0),
        };
        assert_relative_eq!(clean.multiplier(), 0.90 * 0.90 * 0.92, epsilon = 1e-12);
        assert_eq!(WeatherScenario::default().multiplier(), 1.0);
    }

    #[test]
    fn test_ratio_never_exceeds_half() {
        let worst = WeatherScenario {
            stagnation: Some(StagnationLevel::High),
            wind_speed: Some(MetersPerSecond::new(0.2)),
            mixing_height_m: Some(100.0),
        };
        for ndvi in [0.0, 0.5, 1.0] {
            for lulc in [0.1, 1.0, 3.0] {
                let e = intervention_effect(600.0, ndvi, 1.0, lulc, Some(50.0), Some(&worst));
                assert!((0.0..=MAX_RATIO).contains(&e.ratio));
                let e = intervention_effect(600.0, ndvi, 1.0, lulc, None, None);
                assert!(e.ratio <= MAX_ENVIRONMENTAL_RATIO);
            }
        }
    }

    #[test]
    fn test_out_of_range_inputs_sanitized() {
        let e = intervention_effect(f64::NAN, 2.0, -1.0, f64::INFINITY, None, None);
        assert_eq!(e.reduced, 400.0);
        let e = intervention_effect(320.0, 1.0, 1.0, 0.1, None, None);
        assert_eq!(e.reduced, 300.0);
    }

    #[test]
    fn test_stagnation_from_dispersion() {
        assert_eq!(StagnationLevel::from(DispersionClass::Poor), StagnationLevel::High);
        assert_eq!(StagnationLevel::from(DispersionClass::Good), StagnationLevel::Low);
        assert_eq!(StagnationLevel::parse("ELEVATED"), StagnationLevel::Elevated);
        assert_eq!(StagnationLevel::parse("unknown"), StagnationLevel::Normal);
    }

    #[test]
    fn test_log_appends_in_order() {
        let log = InterventionLog::new();
        for (i, station) in ["A", "B"].iter().enumerate() {
            log.append(InterventionRecord {
                station: (*station).to_string(),
                city: "Delhi".into(),
                method: "urban_greening".into(),
                applied_to: ResolvedStore::Baseline,
                before: 500.0,
                after: 480.0 - i as f64,
                ratio: 0.04,
                efficiency: None,
                weather: None,
                applied_at: Utc::now(),
            });
        }
        let records = log.snapshot();
        assert_eq!(log.len(), 2);
        assert_eq!(records[0].station, "A");
        assert_eq!(records[1].delta(), 21.0);
    }
}
