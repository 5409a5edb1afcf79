//! Current weather for a city
//!
//! Weather drives two things downstream: the wind vector of the dispersion
//! grid, and the optional weather modulation of the intervention model. This
//! module holds the snapshot type plus the pure derivations (unit
//! normalization, dispersion label, seasonal multiplier); the cached,
//! rate-limited client lives in [`client`].

pub mod client;

use crate::core_types::units::{Degrees, KilometersPerHour, MetersPerSecond};
use crate::feeds::extract::parse_number;
use crate::feeds::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::{Freshness, WeatherClient, WeatherReport};

/// Coarse atmospheric dispersion label derived from wind speed
///
/// Thresholds (m/s): `< 2` poor, `2..5` moderate, `>= 5` good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionClass {
    /// Near-stagnant air, pollutants accumulate
    Poor,
    Moderate,
    /// Well-ventilated
    Good,
}

impl DispersionClass {
    pub fn from_speed(speed: MetersPerSecond) -> Self {
        if *speed < 2.0 {
            DispersionClass::Poor
        } else if *speed < 5.0 {
            DispersionClass::Moderate
        } else {
            DispersionClass::Good
        }
    }
}

/// Static seasonal pollution multiplier for a calendar month (1-12).
///
/// Winter inversions (Nov-Jan) trap pollutants the most; the monsoon and
/// pre-monsoon months clean the air.
pub fn seasonal_multiplier(month: u32) -> f64 {
    match month {
        11 | 12 | 1 => 1.25,
        10 | 2 => 1.15,
        4..=6 => 0.90,
        7..=9 => 0.95,
        _ => 1.00,
    }
}

/// Which upstream weather API is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherProvider {
    /// Open-Meteo `forecast?current=...` (no key, km/h winds)
    #[default]
    OpenMeteo,
    /// OpenWeatherMap `weather?units=metric` (key required, m/s winds)
    OpenWeatherMap,
}

impl WeatherProvider {
    /// Query parameters for a lat/lon lookup
    pub fn query(&self, lat: f64, lon: f64, api_key: Option<&str>) -> Vec<(&'static str, String)> {
        match self {
            WeatherProvider::OpenMeteo => vec![
                ("latitude", format!("{lat:.4}")),
                ("longitude", format!("{lon:.4}")),
                (
                    "current",
                    "temperature_2m,wind_speed_10m,wind_direction_10m,boundary_layer_height"
                        .to_string(),
                ),
            ],
            WeatherProvider::OpenWeatherMap => {
                let mut q = vec![
                    ("lat", format!("{lat:.4}")),
                    ("lon", format!("{lon:.4}")),
                    ("units", "metric".to_string()),
                ];
                if let Some(key) = api_key {
                    q.push(("appid", key.to_string()));
                }
                q
            }
        }
    }
}

/// Weather fields read from an upstream body, wind already in m/s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub temperature_c: Option<f64>,
    pub wind_speed: MetersPerSecond,
    pub wind_direction: Degrees,
    pub mixing_height_m: Option<f64>,
}

/// Convert a speed in the given unit label to m/s
fn to_meters_per_second(value: f64, unit: &str) -> MetersPerSecond {
    match unit.trim() {
        "m/s" | "ms" => MetersPerSecond::new(value),
        "mp/h" | "mph" => MetersPerSecond::new(value * 0.447_04),
        "kn" | "kt" => MetersPerSecond::new(value * 0.514_444),
        _ => KilometersPerHour::new(value).into(),
    }
}

/// Read an Open-Meteo or OpenWeatherMap body.
///
/// Open-Meteo's `current` block (or legacy `current_weather`) is tried first,
/// honouring `current_units.wind_speed_10m`; then OpenWeatherMap's `wind` /
/// `main` blocks. A body with no wind speed is malformed.
pub fn parse_observation(payload: &Value) -> Result<Observation, FetchError> {
    let num = |v: &Value, key: &str| v.get(key).and_then(parse_number);

    if let Some(current) = payload.get("current").filter(|c| c.is_object()) {
        let unit = payload
            .pointer("/current_units/wind_speed_10m")
            .and_then(Value::as_str)
            .unwrap_or("km/h");
        let speed = num(current, "wind_speed_10m")
            .ok_or_else(|| FetchError::Body("current.wind_speed_10m missing".into()))?;
        return Ok(Observation {
            temperature_c: num(current, "temperature_2m"),
            wind_speed: to_meters_per_second(speed, unit),
            wind_direction: Degrees::new(num(current, "wind_direction_10m").unwrap_or(0.0)),
            mixing_height_m: num(current, "boundary_layer_height"),
        });
    }

    if let Some(current) = payload.get("current_weather").filter(|c| c.is_object()) {
        let speed = num(current, "windspeed")
            .ok_or_else(|| FetchError::Body("current_weather.windspeed missing".into()))?;
        return Ok(Observation {
            temperature_c: num(current, "temperature"),
            wind_speed: KilometersPerHour::new(speed).into(),
            wind_direction: Degrees::new(num(current, "winddirection").unwrap_or(0.0)),
            mixing_height_m: None,
        });
    }

    if let Some(wind) = payload.get("wind").filter(|w| w.is_object()) {
        let speed =
            num(wind, "speed").ok_or_else(|| FetchError::Body("wind.speed missing".into()))?;
        return Ok(Observation {
            temperature_c: payload.get("main").and_then(|m| num(m, "temp")),
            wind_speed: MetersPerSecond::new(speed),
            wind_direction: Degrees::new(num(wind, "deg").unwrap_or(0.0)),
            mixing_height_m: None,
        });
    }

    Err(FetchError::Body("unrecognized weather payload".into()))
}

/// Current weather for one city, as exposed to collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// City as requested
    pub city: String,
    /// Mean coordinates of the city's stations
    pub lat: f64,
    pub lon: f64,
    pub temperature_c: Option<f64>,
    pub wind_speed: MetersPerSecond,
    /// Direction the wind blows *from*
    pub wind_direction: Degrees,
    pub dispersion: DispersionClass,
    pub seasonal_multiplier: f64,
    #[serde(default)]
    pub mixing_height_m: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl WeatherSnapshot {
    pub fn from_observation(
        city: &str,
        (lat, lon): (f64, f64),
        obs: Observation,
        observed_at: DateTime<Utc>,
    ) -> Self {
        use chrono::Datelike;
        Self {
            city: city.to_string(),
            lat,
            lon,
            temperature_c: obs.temperature_c.map(crate::estimator::round2),
            wind_speed: obs.wind_speed,
            wind_direction: obs.wind_direction,
            dispersion: DispersionClass::from_speed(obs.wind_speed),
            seasonal_multiplier: seasonal_multiplier(observed_at.month()),
            mixing_height_m: obs.mixing_height_m,
            observed_at,
        }
    }
}
