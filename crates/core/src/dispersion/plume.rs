//! Simplified ground-level Gaussian plume
//!
//! Each station is treated as a continuous ground-level point source. For a
//! receptor at downwind distance `x` and crosswind offset `y`:
//!
//! ```text
//! C = Q / (π · u · σy · σz) · exp(-y² / 2σy²)        x > 0
//! C = 0                                              x ≤ 0
//! ```
//!
//! with `σy = max(20, ky·x)` and `σz = max(15, kz·x)`. The spread slopes
//! depend on the Pasquill-Gifford stability class.
//!
//! Reference: Turner, D.B. (1994). Workbook of Atmospheric Dispersion
//! Estimates, 2nd ed.

use crate::core_types::units::{Degrees, MetersPerSecond};
use crate::geo::Enu;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Minimum horizontal spread (m)
pub const SIGMA_Y_MIN: f64 = 20.0;

/// Minimum vertical spread (m)
pub const SIGMA_Z_MIN: f64 = 15.0;

/// Pasquill-Gifford atmospheric stability classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StabilityClass {
    /// A: Very unstable (strong solar heating, light winds)
    A,
    /// B: Moderately unstable
    B,
    /// C: Slightly unstable
    C,
    /// D: Neutral (overcast or high winds)
    #[default]
    D,
    /// E: Slightly stable
    E,
    /// F: Very stable (nighttime, light winds)
    F,
}

impl StabilityClass {
    /// Linear growth rates `(ky, kz)` of σy and σz with downwind distance.
    ///
    /// Open-country Briggs slopes near the origin; more stable air spreads
    /// the plume more slowly.
    #[must_use]
    pub fn spread_slopes(&self) -> (f64, f64) {
        match self {
            StabilityClass::A => (0.22, 0.20),
            StabilityClass::B => (0.16, 0.12),
            StabilityClass::C => (0.11, 0.08),
            StabilityClass::D => (0.08, 0.06),
            StabilityClass::E => (0.06, 0.03),
            StabilityClass::F => (0.04, 0.016),
        }
    }

    /// Parse a single letter `A`-`F` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Some(StabilityClass::A),
            "B" => Some(StabilityClass::B),
            "C" => Some(StabilityClass::C),
            "D" => Some(StabilityClass::D),
            "E" => Some(StabilityClass::E),
            "F" => Some(StabilityClass::F),
            _ => None,
        }
    }
}

/// Unit vectors of the plume's downwind and crosswind axes in the east/north frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlumeAxes {
    pub downwind: Enu,
    pub crosswind: Enu,
}

impl PlumeAxes {
    /// Axes for a wind blowing *from* `direction` (meteorological convention:
    /// degrees clockwise from north). The plume travels the opposite way.
    pub fn from_wind_direction(direction: Degrees) -> Self {
        let heading = direction.reversed().to_radians();
        // Compass bearing to east/north components
        let downwind = Enu::new(heading.sin(), heading.cos());
        let crosswind = Enu::new(-downwind.y, downwind.x);
        Self {
            downwind,
            crosswind,
        }
    }

    /// Split an offset into (downwind, crosswind) distances.
    pub fn decompose(&self, offset: Enu) -> (f64, f64) {
        (offset.dot(&self.downwind), offset.dot(&self.crosswind))
    }
}

/// One point source under a fixed wind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianPlume {
    /// Source position in the local frame (m)
    pub source: Enu,
    /// Relative source strength
    pub strength: f64,
    pub speed: MetersPerSecond,
    pub axes: PlumeAxes,
    pub stability: StabilityClass,
}

impl GaussianPlume {
    /// Ground-level concentration contribution at `receptor`.
    pub fn concentration_at(&self, receptor: Enu) -> f64 {
        let (x, y) = self.axes.decompose(receptor - self.source);
        if x <= 0.0 || *self.speed <= 0.0 || self.strength <= 0.0 {
            return 0.0;
        }
        let (ky, kz) = self.stability.spread_slopes();
        let sigma_y = (ky * x).max(SIGMA_Y_MIN);
        let sigma_z = (kz * x).max(SIGMA_Z_MIN);
        let peak = self.strength / (PI * *self.speed * sigma_y * sigma_z);
        peak * (-(y * y) / (2.0 * sigma_y * sigma_y)).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plume(direction: f64, speed: f64) -> GaussianPlume {
        GaussianPlume {
            source: Enu::zeros(),
            strength: 1.0,
            speed: MetersPerSecond::new(speed),
            axes: PlumeAxes::from_wind_direction(Degrees::new(direction)),
            stability: StabilityClass::D,
        }
    }

    #[test]
    fn test_axes_westerly_wind_blows_east() {
        let axes = PlumeAxes::from_wind_direction(Degrees::new(270.0));
        assert_relative_eq!(axes.downwind.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(axes.downwind.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(axes.downwind.dot(&axes.crosswind), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_upwind_is_zero() {
        // Northerly wind: plume travels south
        let p = plume(0.0, 3.0);
        assert_eq!(p.concentration_at(Enu::new(0.0, 500.0)), 0.0);
        assert!(p.concentration_at(Enu::new(0.0, -500.0)) > 0.0);
    }

    #[test]
    fn test_crosswind_falloff_strictly_decreasing() {
        let p = plume(0.0, 0.5);
        let values: Vec<f64> = [0.0, 50.0, 100.0, 200.0, 400.0]
            .iter()
            .map(|&y| p.concentration_at(Enu::new(y, -1_000.0)))
            .collect();
        for pair in values.windows(2) {
            assert!(pair[0] > pair[1], "{values:?}");
        }
    }

    #[test]
    fn test_spread_floors_near_source() {
        let p = plume(180.0, 2.0);
        let near = p.concentration_at(Enu::new(0.0, 10.0));
        assert_relative_eq!(near, 1.0 / (PI * 2.0 * SIGMA_Y_MIN * SIGMA_Z_MIN), epsilon = 1e-12);
    }

    #[test]
    fn test_stability_parse() {
        assert_eq!(StabilityClass::parse(" f "), Some(StabilityClass::F));
        assert_eq!(StabilityClass::parse("G"), None);
    }
}
