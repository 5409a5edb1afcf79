//! Startup datasets: station registry, id mapping, daily history and
//! environmental reference factors
//!
//! Files live in one directory. When the deployment encrypts them at rest,
//! each `<name>` is read from `<name>.enc` and decrypted with a Fernet key.
//! Malformed rows are skipped with a warning; an unreadable required file is
//! a [`EngineError::Dataset`].

use crate::core_types::profile::{EnvironmentalProfile, ProfileSource};
use crate::core_types::station::Station;
use crate::error::EngineError;
use crate::estimator::AMBIENT_PPM;
use chrono::{Datelike, NaiveDate};
use fernet::Fernet;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

pub const STATION_LOCATIONS: &str = "station_loc.csv";
pub const STATION_DAYS: &str = "station_day.csv";
pub const STATION_IDS: &str = "station_id.json";
pub const STATION_ENV_FACTORS: &str = "station_env_factors.csv";

/// Suffix of encrypted dataset files
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Multiplier from the historical CO column (mg/m³) to the baseline scale
const CO_SCALE: f64 = 1000.0;

#[derive(Debug, Deserialize)]
struct StationRow {
    #[serde(rename = "StationId", default)]
    id: Option<String>,
    #[serde(rename = "StationName")]
    name: String,
    #[serde(rename = "City", default)]
    city: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Lat")]
    lat: f64,
    #[serde(rename = "Lon")]
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct DayRow {
    #[serde(rename = "StationId")]
    station_id: String,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "CO", default, deserialize_with = "csv::invalid_option")]
    co: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EnvFactorRow {
    #[serde(rename = "StationId")]
    station_id: String,
    #[serde(rename = "NDVI")]
    ndvi: f64,
    #[serde(rename = "Albedo")]
    albedo: f64,
    #[serde(rename = "LULC")]
    lulc: String,
}

/// Daily history grouped by calendar (month, day), rows in file order
#[derive(Debug, Clone, Default)]
pub struct HistoricalTable {
    by_date: FxHashMap<(u32, u32), Vec<(String, Option<f64>)>>,
    rows: usize,
}

impl HistoricalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one row. A missing or non-finite CO value is kept as `None`.
    pub fn push(&mut self, station_id: impl Into<String>, date: NaiveDate, co: Option<f64>) {
        self.by_date
            .entry((date.month(), date.day()))
            .or_default()
            .push((station_id.into(), co.filter(|v| v.is_finite())));
        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Baseline map (station name → value) for a calendar date.
    ///
    /// `None` if no row falls on that date. Rows whose id has no name in
    /// `id_to_name` are skipped; for repeated stations the last row wins.
    pub fn baseline_for(
        &self,
        month: u32,
        day: u32,
        id_to_name: &FxHashMap<String, String>,
    ) -> Option<FxHashMap<String, f64>> {
        let rows = self.by_date.get(&(month, day))?;
        let mut baseline = FxHashMap::default();
        for (id, co) in rows {
            if let Some(name) = id_to_name.get(id) {
                let value = co.map_or(AMBIENT_PPM, |co| co * CO_SCALE);
                baseline.insert(name.clone(), value);
            }
        }
        Some(baseline)
    }
}

/// Everything loaded at startup
#[derive(Debug, Clone, Default)]
pub struct Datasets {
    pub stations: Vec<Station>,
    pub id_to_name: FxHashMap<String, String>,
    pub history: HistoricalTable,
    /// Reference profiles keyed by station id
    pub env_factors: FxHashMap<String, EnvironmentalProfile>,
}

/// Reads dataset files from a directory, decrypting when keyed
pub struct DatasetReader {
    dir: PathBuf,
    fernet: Option<Fernet>,
}

impl DatasetReader {
    /// Reader for plaintext files
    pub fn plain(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fernet: None,
        }
    }

    /// Reader for `.enc` files encrypted with the url-safe base64 Fernet `key`
    pub fn encrypted(dir: impl Into<PathBuf>, key: &str) -> Result<Self, EngineError> {
        let fernet = Fernet::new(key.trim())
            .ok_or_else(|| EngineError::Config("dataset key is not a valid Fernet key".into()))?;
        Ok(Self {
            dir: dir.into(),
            fernet: Some(fernet),
        })
    }

    fn path(&self, file: &str) -> PathBuf {
        match self.fernet {
            Some(_) => self.dir.join(format!("{file}{ENCRYPTED_SUFFIX}")),
            None => self.dir.join(file),
        }
    }

    pub fn exists(&self, file: &str) -> bool {
        self.path(file).exists()
    }

    /// Raw (decrypted) bytes of a dataset file
    pub fn read(&self, file: &str) -> Result<Vec<u8>, EngineError> {
        let path = self.path(file);
        let bytes = fs::read(&path)
            .map_err(|e| EngineError::Dataset(format!("{}: {e}", path.display())))?;
        let Some(fernet) = &self.fernet else {
            return Ok(bytes);
        };
        let token = String::from_utf8(bytes)
            .map_err(|_| EngineError::Dataset(format!("{}: token is not UTF-8", path.display())))?;
        fernet
            .decrypt(token.trim())
            .map_err(|_| EngineError::Dataset(format!("{}: decryption failed", path.display())))
    }

    /// `station_id.json`: id → station name
    pub fn id_map(&self) -> Result<FxHashMap<String, String>, EngineError> {
        let bytes = self.read(STATION_IDS)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Dataset(format!("{STATION_IDS}: {e}")))
    }

    /// `station_loc.csv`. Ids come from the `StationId` column, else the id
    /// mapping (smallest id for the name), else the name itself.
    pub fn stations(
        &self,
        id_to_name: &FxHashMap<String, String>,
    ) -> Result<Vec<Station>, EngineError> {
        let mut id_by_name: FxHashMap<&str, &str> = FxHashMap::default();
        for (id, name) in id_to_name {
            let slot = id_by_name.entry(name.as_str()).or_insert(id.as_str());
            if id.as_str() < *slot {
                *slot = id.as_str();
            }
        }

        let bytes = self.read(STATION_LOCATIONS)?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes.as_slice());
        let mut stations = Vec::new();
        for (line, row) in reader.deserialize::<StationRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(file = STATION_LOCATIONS, line = line + 2, error = %e, "skipping station row");
                    continue;
                }
            };
            if !row.lat.is_finite() || !row.lon.is_finite() || row.name.is_empty() {
                warn!(file = STATION_LOCATIONS, line = line + 2, "skipping station row without coordinates");
                continue;
            }
            let id = row
                .id
                .filter(|id| !id.is_empty())
                .or_else(|| id_by_name.get(row.name.as_str()).map(|id| (*id).to_string()))
                .unwrap_or_else(|| row.name.clone());
            stations.push(Station {
                id,
                name: row.name,
                city: row.city,
                state: row.state,
                lat: row.lat,
                lon: row.lon,
            });
        }
        Ok(stations)
    }

    /// `station_day.csv`
    pub fn history(&self) -> Result<HistoricalTable, EngineError> {
        let bytes = self.read(STATION_DAYS)?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes.as_slice());
        let mut table = HistoricalTable::new();
        let mut skipped = 0usize;
        for row in reader.deserialize::<DayRow>() {
            let Ok(row) = row else {
                skipped += 1;
                continue;
            };
            // Accept `YYYY-MM-DD` with or without a trailing time
            let Some(date) = row
                .date
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                skipped += 1;
                continue;
            };
            table.push(row.station_id, date, row.co);
        }
        if skipped > 0 {
            warn!(file = STATION_DAYS, skipped, "skipped malformed history rows");
        }
        Ok(table)
    }

    /// `station_env_factors.csv`; a missing file yields an empty table.
    pub fn env_factors(&self) -> Result<FxHashMap<String, EnvironmentalProfile>, EngineError> {
        if !self.exists(STATION_ENV_FACTORS) {
            info!(file = STATION_ENV_FACTORS, "no environmental reference table; all profiles synthetic");
            return Ok(FxHashMap::default());
        }
        let bytes = self.read(STATION_ENV_FACTORS)?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes.as_slice());
        let mut factors = FxHashMap::default();
        for row in reader.deserialize::<EnvFactorRow>() {
            match row {
                Ok(row) => {
                    factors.insert(
                        row.station_id,
                        EnvironmentalProfile::new(row.ndvi, row.albedo, row.lulc, ProfileSource::Reference),
                    );
                }
                Err(e) => warn!(file = STATION_ENV_FACTORS, error = %e, "skipping factor row"),
            }
        }
        Ok(factors)
    }

    /// Load every dataset.
    pub fn load(&self) -> Result<Datasets, EngineError> {
        let id_to_name = self.id_map()?;
        let stations = self.stations(&id_to_name)?;
        let history = self.history()?;
        let env_factors = self.env_factors()?;
        info!(
            dir = %self.dir.display(),
            encrypted = self.fernet.is_some(),
            stations = stations.len(),
            ids = id_to_name.len(),
            history_rows = history.rows(),
            env_factors = env_factors.len(),
            "datasets loaded"
        );
        Ok(Datasets {
            stations,
            id_to_name,
            history,
            env_factors,
        })
    }
}
