//! Monitoring station identity and public snapshot types

use serde::{Deserialize, Serialize};

/// A fixed, pre-registered monitoring point
///
/// Stations are loaded once at startup and never change afterwards; every
/// concentration map in the engine is keyed by [`Station::name`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Registry identifier (e.g. `"DL031"`). Falls back to the name when the
    /// registry row carries no id and the id mapping has no entry.
    pub id: String,
    pub name: String,
    pub city: String,
    pub state: String,
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
}

/// The public fields of a station that are signed by the integrity token.
///
/// Clients receive this alongside a token and may echo both back with an
/// intervention request; any change to these fields invalidates the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub name: String,
    pub city: String,
    /// Concentration in ppm shown to the client
    pub concentration: f64,
    pub ndvi: f64,
    pub albedo: f64,
    pub lulc: String,
}

/// Full station row returned to collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationView {
    pub id: String,
    pub name: String,
    pub city: String,
    pub state: String,
    pub lat: f64,
    pub lon: f64,
    /// Historical baseline for the simulated date, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,
    /// Most recent fused feed estimate, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<f64>,
    /// Observation time of the live estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_ts: Option<String>,
    pub ndvi: f64,
    pub albedo: f64,
    pub lulc: String,
    /// Integrity token over [`StationView::snapshot`]; absent when the station
    /// has no concentration to sign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl StationView {
    /// The signed snapshot for this row, using baseline then live.
    pub fn snapshot(&self) -> Option<StationSnapshot> {
        let concentration = self.baseline.or(self.live)?;
        Some(StationSnapshot {
            name: self.name.clone(),
            city: self.city.clone(),
            concentration,
            ndvi: self.ndvi,
            albedo: self.albedo,
            lulc: self.lulc.clone(),
        })
    }
}
