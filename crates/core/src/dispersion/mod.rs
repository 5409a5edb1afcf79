//! City-scale dispersion grid
//!
//! Builds a square lat/lon mesh over a city's stations and sums a Gaussian
//! plume from every station at each cell. The raw field is then rescaled into
//! a fixed display range so that grids from different cities and winds are
//! comparable on a map.

pub mod plume;

use crate::core_types::units::{Degrees, MetersPerSecond};
use crate::estimator::{round2, AMBIENT_PPM};
use crate::geo::{Enu, LocalFrame};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use plume::{GaussianPlume, PlumeAxes, StabilityClass};

/// Minimum source strength before normalization
const MIN_SOURCE_STRENGTH: f64 = 10.0;

/// Configuration for [`DispersionEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionConfig {
    /// Cells per side (clamped to `[2, 200]`)
    pub grid_size: usize,

    /// Bounding-box padding around the stations (degrees)
    pub margin_deg: f64,

    /// Display value of a cell with no plume contribution (ppm)
    pub display_floor: f64,

    /// Display value of the hottest cell (ppm)
    pub display_ceiling: f64,

    /// Wind speeds below this are raised to it (m/s)
    pub min_wind_speed: f64,

    /// Stability class (Pasquill-Gifford categories A-F)
    pub stability_class: StabilityClass,

    /// Wind used when neither an override nor weather is available
    pub default_wind_speed: f64,
    pub default_wind_direction: f64,
}

impl Default for DispersionConfig {
    fn default() -> Self {
        Self {
            grid_size: 25,
            margin_deg: 0.05,
            display_floor: AMBIENT_PPM,
            display_ceiling: 1000.0,
            min_wind_speed: 0.5,
            stability_class: StabilityClass::D,
            default_wind_speed: 2.0,
            default_wind_direction: 270.0,
        }
    }
}

impl DispersionConfig {
    pub fn default_wind(&self) -> Wind {
        Wind::new(self.default_wind_speed, self.default_wind_direction)
    }
}

/// Wind speed and the direction it blows from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed: MetersPerSecond,
    pub direction: Degrees,
}

impl Wind {
    pub fn new(speed: f64, direction: f64) -> Self {
        Self {
            speed: MetersPerSecond::new(speed),
            direction: Degrees::new(direction),
        }
    }
}

/// Where the wind used for a grid came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindSource {
    Override,
    Weather,
    Default,
}

/// A station acting as a plume source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceStation {
    pub lat: f64,
    pub lon: f64,
    /// Current concentration (ppm)
    pub concentration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridCell {
    pub lat: f64,
    pub lon: f64,
    pub concentration: f64,
}

/// A computed dispersion field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispersionGrid {
    pub city: String,
    /// Cells per side; 0 for an empty grid
    pub size: usize,
    pub wind: Wind,
    pub wind_source: WindSource,
    pub stability: StabilityClass,
    pub sources: usize,
    /// Row-major, south to north then west to east
    pub cells: Vec<GridCell>,
}

impl DispersionGrid {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

/// Raw field value at `receptor`: the sum of every plume's contribution.
///
/// Non-decreasing in each plume's strength.
pub fn superpose(plumes: &[GaussianPlume], receptor: Enu) -> f64 {
    plumes.iter().map(|p| p.concentration_at(receptor)).sum()
}

pub struct DispersionEngine {
    config: DispersionConfig,
}

impl DispersionEngine {
    pub fn new(config: DispersionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispersionConfig {
        &self.config
    }

    /// Compute the display grid for `sources` under `wind`.
    ///
    /// Sources with a non-finite concentration are ignored; if none remain the
    /// grid is empty.
    pub fn compute(
        &self,
        city: &str,
        sources: &[SourceStation],
        wind: Wind,
        wind_source: WindSource,
    ) -> DispersionGrid {
        let stability = self.config.stability_class;
        let mut grid = DispersionGrid {
            city: city.to_string(),
            size: 0,
            wind,
            wind_source,
            stability,
            sources: 0,
            cells: Vec::new(),
        };

        let sources: Vec<&SourceStation> = sources
            .iter()
            .filter(|s| s.lat.is_finite() && s.lon.is_finite() && s.concentration.is_finite())
            .collect();
        let Some(frame) = LocalFrame::centroid(sources.iter().map(|s| (s.lat, s.lon))) else {
            return grid;
        };

        let strengths: Vec<f64> = sources
            .iter()
            .map(|s| (s.concentration - AMBIENT_PPM).max(MIN_SOURCE_STRENGTH))
            .collect();
        let q_max = strengths.iter().copied().fold(0.0_f64, f64::max);
        if q_max <= 0.0 {
            return grid;
        }

        let speed = wind
            .speed
            .at_least(MetersPerSecond::new(self.config.min_wind_speed));
        let axes = PlumeAxes::from_wind_direction(wind.direction);
        let plumes: Vec<GaussianPlume> = sources
            .iter()
            .zip(&strengths)
            .map(|(s, q)| GaussianPlume {
                source: frame.project(s.lat, s.lon),
                strength: q / q_max,
                speed,
                axes,
                stability,
            })
            .collect();

        let n = self.config.grid_size.clamp(2, 200);
        let margin = self.config.margin_deg.max(0.0);
        let (mut min_lat, mut max_lat) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_lon, mut max_lon) = (f64::INFINITY, f64::NEG_INFINITY);
        for s in &sources {
            min_lat = min_lat.min(s.lat);
            max_lat = max_lat.max(s.lat);
            min_lon = min_lon.min(s.lon);
            max_lon = max_lon.max(s.lon);
        }
        min_lat -= margin;
        max_lat += margin;
        min_lon -= margin;
        max_lon += margin;
        let step_lat = (max_lat - min_lat) / (n - 1) as f64;
        let step_lon = (max_lon - min_lon) / (n - 1) as f64;

        let rows: Vec<Vec<(f64, f64, f64)>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let lat = min_lat + i as f64 * step_lat;
                (0..n)
                    .map(|j| {
                        let lon = min_lon + j as f64 * step_lon;
                        let receptor = frame.project(lat, lon);
                        (lat, lon, superpose(&plumes, receptor))
                    })
                    .collect()
            })
            .collect();

        let raw_max = rows
            .iter()
            .flatten()
            .map(|&(_, _, raw)| raw)
            .fold(0.0_f64, f64::max);
        let floor = self.config.display_floor;
        let span = (self.config.display_ceiling - floor).max(0.0);

        grid.cells = rows
            .into_iter()
            .flatten()
            .map(|(lat, lon, raw)| {
                let scaled = if raw_max > 0.0 {
                    floor + raw / raw_max * span
                } else {
                    floor
                };
                GridCell {
                    lat: round5(lat),
                    lon: round5(lon),
                    concentration: round2(scaled),
                }
            })
            .collect();
        grid.size = n;
        grid.sources = plumes.len();

        debug!(
            city,
            size = n,
            sources = grid.sources,
            raw_max,
            speed = %speed,
            "dispersion grid computed"
        );
        grid
    }
}
