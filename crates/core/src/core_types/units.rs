//! Semantic unit types for wind and distance handling
//!
//! Upstream weather services disagree on wind units (Open-Meteo reports km/h,
//! OpenWeatherMap reports m/s). These newtypes make the canonical unit explicit
//! so a km/h value can never reach the plume model unconverted.
//!
//! # Usage
//! ```
//! use airtwin_core::core_types::units::{KilometersPerHour, MetersPerSecond};
//!
//! let gust = KilometersPerHour::new(36.0);
//! let canonical: MetersPerSecond = gust.into();
//! assert!((*canonical - 10.0).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

/// Compare f64 values with total ordering using Rust's built-in `total_cmp`
#[inline]
fn f64_total_cmp(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

// ============================================================================
// SPEED
// ============================================================================

/// Wind speed in meters per second (canonical unit)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MetersPerSecond(f64);

impl MetersPerSecond {
    /// Calm air
    pub const CALM: MetersPerSecond = MetersPerSecond(0.0);

    /// Create a new speed. Negative and non-finite inputs collapse to calm.
    #[inline]
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            MetersPerSecond(value)
        } else {
            Self::CALM
        }
    }

    /// Raise the speed to at least `floor`
    #[inline]
    #[must_use]
    pub fn at_least(self, floor: MetersPerSecond) -> Self {
        if self.0 < floor.0 {
            floor
        } else {
            self
        }
    }
}

impl Eq for MetersPerSecond {}

impl PartialOrd for MetersPerSecond {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetersPerSecond {
    fn cmp(&self, other: &Self) -> Ordering {
        f64_total_cmp(self.0, other.0)
    }
}

impl Deref for MetersPerSecond {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl fmt::Display for MetersPerSecond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} m/s", self.0)
    }
}

/// Wind speed in kilometers per hour
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct KilometersPerHour(f64);

impl KilometersPerHour {
    /// km/h to m/s divisor
    const KMH_PER_MS: f64 = 3.6;

    /// Create a new speed. Negative and non-finite inputs collapse to zero.
    #[inline]
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            KilometersPerHour(value)
        } else {
            KilometersPerHour(0.0)
        }
    }
}

impl Deref for KilometersPerHour {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl From<KilometersPerHour> for MetersPerSecond {
    fn from(kmh: KilometersPerHour) -> Self {
        MetersPerSecond::new(kmh.0 / KilometersPerHour::KMH_PER_MS)
    }
}

impl From<MetersPerSecond> for KilometersPerHour {
    fn from(ms: MetersPerSecond) -> Self {
        KilometersPerHour::new(ms.0 * KilometersPerHour::KMH_PER_MS)
    }
}

// ============================================================================
// ANGLE
// ============================================================================

/// Compass bearing in degrees, normalized to `[0, 360)`
///
/// Meteorological convention: 0 = North, 90 = East. Wind directions are
/// always "from" bearings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Degrees(f64);

impl Degrees {
    /// Create a bearing, wrapping into `[0, 360)`. Non-finite input becomes 0.
    #[inline]
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_finite() {
            Degrees(value.rem_euclid(360.0))
        } else {
            Degrees(0.0)
        }
    }

    /// The opposite bearing (e.g. wind "from" → plume "towards")
    #[inline]
    #[must_use]
    pub fn reversed(self) -> Self {
        Degrees::new(self.0 + 180.0)
    }

    #[inline]
    #[must_use]
    pub fn to_radians(self) -> f64 {
        self.0.to_radians()
    }
}

impl Deref for Degrees {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl fmt::Display for Degrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}°", self.0)
    }
}

// ============================================================================
// DISTANCE
// ============================================================================

/// Distance in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Meters(f64);

impl Meters {
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Meters(value)
    }

    #[inline]
    #[must_use]
    pub fn from_kilometers(km: f64) -> Self {
        Meters(km * 1000.0)
    }
}

impl Eq for Meters {}

impl PartialOrd for Meters {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Meters {
    fn cmp(&self, other: &Self) -> Ordering {
        f64_total_cmp(self.0, other.0)
    }
}

impl Deref for Meters {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl fmt::Display for Meters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1000.0 {
            write!(f, "{:.2} km", self.0 / 1000.0)
        } else {
            write!(f, "{:.0} m", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kmh_to_ms() {
        let ms: MetersPerSecond = KilometersPerHour::new(18.0).into();
        assert!((*ms - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_speed_rejects_garbage() {
        assert_eq!(MetersPerSecond::new(f64::NAN), MetersPerSecond::CALM);
        assert_eq!(MetersPerSecond::new(-3.0), MetersPerSecond::CALM);
        assert_eq!(
            MetersPerSecond::CALM.at_least(MetersPerSecond::new(0.5)),
            MetersPerSecond::new(0.5)
        );
    }

    #[test]
    fn test_degrees_wrap() {
        assert_eq!(*Degrees::new(450.0), 90.0);
        assert_eq!(*Degrees::new(-90.0), 270.0);
        assert_eq!(*Degrees::new(270.0).reversed(), 90.0);
    }

    #[test]
    fn test_meters_display() {
        assert_eq!(Meters::new(250.0).to_string(), "250 m");
        assert_eq!(Meters::from_kilometers(15.0).to_string(), "15.00 km");
    }
}
