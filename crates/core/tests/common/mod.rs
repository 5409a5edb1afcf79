//! Shared fixtures: a small Delhi/Mumbai registry and canned upstreams.

#![allow(dead_code)]

use airtwin_core::core_types::profile::ProfileSource;
use airtwin_core::datasets::{Datasets, HistoricalTable};
use airtwin_core::feeds::{CannedFetcher, FetchError};
use airtwin_core::{EngineConfig, EnvironmentalProfile, Engine, Secrets, Station, Upstreams};
use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::sync::Arc;

pub const ANAND_VIHAR: (f64, f64) = (28.6469, 77.3164);
pub const ITO: (f64, f64) = (28.6286, 77.2410);
pub const BANDRA: (f64, f64) = (19.0596, 72.8295);

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn station(id: &str, name: &str, city: &str, state: &str, (lat, lon): (f64, f64)) -> Station {
    Station {
        id: id.to_string(),
        name: name.to_string(),
        city: city.to_string(),
        state: state.to_string(),
        lat,
        lon,
    }
}

/// Four stations; Hebbal has neither history nor a reference profile.
pub fn datasets() -> Datasets {
    let stations = vec![
        station("DL001", "Anand Vihar", "Delhi", "Delhi", ANAND_VIHAR),
        station("DL002", "ITO", "Delhi", "Delhi", ITO),
        station("MH001", "Bandra", "Mumbai", "Maharashtra", BANDRA),
        station("KA001", "Hebbal", "Bengaluru", "Karnataka", (13.0358, 77.5970)),
    ];
    let id_to_name: FxHashMap<String, String> = [
        ("DL001", "Anand Vihar"),
        ("DL002", "ITO"),
        ("MH001", "Bandra"),
    ]
    .into_iter()
    .map(|(id, name)| (id.to_string(), name.to_string()))
    .collect();

    let mut history = HistoricalTable::new();
    let nov2 = NaiveDate::from_ymd_opt(2023, 11, 2).unwrap();
    history.push("DL001", nov2, Some(0.45));
    history.push("DL002", nov2, None);
    history.push("MH001", nov2, Some(0.6));
    let jan1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    history.push("DL001", jan1, Some(0.9));

    let mut env_factors = FxHashMap::default();
    env_factors.insert(
        "DL001".to_string(),
        EnvironmentalProfile::new(0.3, 0.15, "Urban", ProfileSource::Reference),
    );

    Datasets {
        stations,
        id_to_name,
        history,
        env_factors,
    }
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.weather.cache_path = None;
    config.profiles.session_seed = Some(7);
    config
}

pub fn secrets() -> Secrets {
    Secrets {
        token_secret: "integration-secret".to_string(),
        ..Secrets::default()
    }
}

/// Primary payload with one PM2.5 record per `(lat, lon, pm25)`.
pub fn primary_payload(records: &[(f64, f64, f64)]) -> Value {
    let stations: Vec<Value> = records
        .iter()
        .enumerate()
        .map(|(i, (lat, lon, pm25))| {
            json!({
                "stationName": format!("sensor-{i}"),
                "latitude": lat,
                "longitude": lon,
                "lastUpdate": "2024-11-02 10:00:00",
                "pollutants": [{"indexId": "PM2.5", "avg": pm25}]
            })
        })
        .collect();
    json!({"data": [{"stateId": "Delhi", "citiesInState": [
        {"cityId": "Delhi", "stationsInCity": stations}
    ]}]})
}

pub fn fallback_payload(lat: f64, lon: f64, pm25: f64) -> Value {
    json!({"results": [
        {"location": "openaq-sensor", "parameter": "pm25", "value": pm25,
         "coordinates": {"latitude": lat, "longitude": lon},
         "date": {"utc": "2024-11-02T10:00:00Z"}}
    ]})
}

/// Open-Meteo style body; 3.6 km/h is 1.0 m/s
pub fn calm_weather() -> Value {
    json!({"current": {"temperature_2m": 24.0, "wind_speed_10m": 3.6, "wind_direction_10m": 90}})
}

pub struct Harness {
    pub engine: Engine,
    pub primary: Arc<CannedFetcher>,
    pub fallback: Arc<CannedFetcher>,
    pub weather: Arc<CannedFetcher>,
}

pub fn harness_with(
    primary: CannedFetcher,
    fallback: CannedFetcher,
    weather: CannedFetcher,
) -> Harness {
    let primary = Arc::new(primary);
    let fallback = Arc::new(fallback);
    let weather = Arc::new(weather);
    let upstreams = Upstreams {
        primary: primary.clone(),
        fallback: fallback.clone(),
        weather: weather.clone(),
    };
    let engine = Engine::assemble(&config(), &secrets(), datasets(), upstreams).unwrap();
    Harness {
        engine,
        primary,
        fallback,
        weather,
    }
}

/// Every upstream down
pub fn offline() -> Harness {
    harness_with(
        CannedFetcher::failing(FetchError::Timeout),
        CannedFetcher::failing(FetchError::Timeout),
        CannedFetcher::failing(FetchError::Timeout),
    )
}

pub fn all_values(engine: &Engine) -> Vec<f64> {
    engine.with_store(|store| store.values().collect())
}
