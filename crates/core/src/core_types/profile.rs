//! Environmental covariates used by the intervention model

use serde::{Deserialize, Serialize};

/// Urbanization factor used when a LULC label is not in [`LULC_FACTORS`]
pub const DEFAULT_LULC_FACTOR: f64 = 1.5;

/// Land-use/land-cover labels and their urbanization factors.
///
/// Higher factors mean denser built-up area and therefore less room for
/// vegetation- or albedo-driven reduction.
pub const LULC_FACTORS: [(&str, f64); 12] = [
    ("Urban", 2.0),
    ("Industrial", 2.5),
    ("Residential", 1.8),
    ("Campus", 1.5),
    ("Rural", 1.0),
    ("Mixed Urban", 2.0),
    ("Industrial/Residential", 2.2),
    ("Urban Vegetation", 1.3),
    ("Airport", 2.5),
    ("Sports Complex", 1.5),
    ("Government", 1.8),
    ("Mixed Forest", 1.0),
];

/// Look up the urbanization factor for a LULC label (exact match).
pub fn lulc_factor(label: &str) -> f64 {
    LULC_FACTORS
        .iter()
        .find(|(name, _)| *name == label)
        .map_or(DEFAULT_LULC_FACTOR, |(_, factor)| *factor)
}

/// Where a profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    /// Row in the station environmental reference table
    Reference,
    /// Generated once for this process
    Synthetic,
}

/// Vegetation index, surface reflectance and land-use class for one station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalProfile {
    /// Normalized difference vegetation index, `[0, 1]`
    pub ndvi: f64,
    /// Surface albedo, `[0, 1]`
    pub albedo: f64,
    /// Land-use/land-cover label
    pub lulc: String,
    pub source: ProfileSource,
}

impl EnvironmentalProfile {
    /// Create a profile, clamping the covariates into `[0, 1]`.
    ///
    /// Non-finite covariates are treated as 0.
    pub fn new(ndvi: f64, albedo: f64, lulc: impl Into<String>, source: ProfileSource) -> Self {
        let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            ndvi: unit(ndvi),
            albedo: unit(albedo),
            lulc: lulc.into(),
            source,
        }
    }

    pub fn lulc_factor(&self) -> f64 {
        lulc_factor(&self.lulc)
    }
}
