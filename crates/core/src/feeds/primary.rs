//! Primary gas feed normalizer
//!
//! Fetches the primary (state → city → station) feed and fuses it into a
//! complete replacement live map. Individual records that cannot be read or
//! matched are dropped; the refresh only fails when the payload is
//! unreachable or has no locatable record list, in which case the caller
//! keeps its existing live map.

use super::extract::{
    flatten_records, locate_record_list, parse_coordinates, parse_name, parse_pollutants,
    parse_timestamp,
};
use super::{FetchError, Fetcher};
use crate::core_types::units::Meters;
use crate::estimator::PollutantAverages;
use crate::registry::StationRegistry;
use crate::store::LiveMaps;
use chrono::{DateTime, SecondsFormat, Utc};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One readable sensor record
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub pollutants: PollutantAverages,
    pub last_update: Option<String>,
}

/// A fused feed, ready to be swapped into the store
#[derive(Debug, Clone, Default)]
pub struct NormalizedFeed {
    pub live: FxHashMap<String, f64>,
    pub live_ts: FxHashMap<String, String>,
    /// Sensor records seen in the payload
    pub total: usize,
    /// Records matched to a registry station
    pub mapped: usize,
    /// Name of the extraction strategy that located the record list
    pub strategy: String,
}

impl NormalizedFeed {
    pub fn into_maps(self) -> LiveMaps {
        (self.live, self.live_ts)
    }
}

/// Read a multi-pollutant record. `None` when coordinates are unusable.
pub fn read_multi_pollutant(obj: &Map<String, Value>) -> Option<SensorReading> {
    let (lat, lon) = parse_coordinates(obj)?;
    Some(SensorReading {
        name: parse_name(obj),
        lat,
        lon,
        pollutants: parse_pollutants(obj),
        last_update: parse_timestamp(obj),
    })
}

/// Locate, flatten, read, estimate and match every record in `payload`.
///
/// `read` turns a raw record into a reading; records it rejects are skipped.
/// Returns `None` if no record list can be located.
pub fn fuse<F>(
    payload: &Value,
    registry: &StationRegistry,
    radius: Meters,
    now: DateTime<Utc>,
    read: F,
) -> Option<NormalizedFeed>
where
    F: Fn(&Map<String, Value>) -> Option<SensorReading>,
{
    let (strategy, list) = locate_record_list(payload)?;
    let records = flatten_records(list);
    if records.is_empty() {
        return None;
    }

    let fallback_ts = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut feed = NormalizedFeed {
        total: records.len(),
        strategy: strategy.name(),
        ..NormalizedFeed::default()
    };

    for record in records {
        let Some(reading) = read(record) else {
            continue;
        };
        let Some((station, distance)) = registry.nearest(reading.lat, reading.lon, radius) else {
            debug!(
                feed_station = reading.name.as_deref().unwrap_or("?"),
                lat = reading.lat,
                lon = reading.lon,
                "no registry station within radius"
            );
            continue;
        };
        let estimate = reading.pollutants.estimate();
        debug!(
            feed_station = reading.name.as_deref().unwrap_or("?"),
            station = %station.name,
            %distance,
            estimate,
            "mapped feed record"
        );
        feed.live.insert(station.name.clone(), estimate);
        feed.live_ts.insert(
            station.name.clone(),
            reading.last_update.unwrap_or_else(|| fallback_ts.clone()),
        );
        feed.mapped += 1;
    }
    Some(feed)
}

/// The primary multi-pollutant feed
pub struct PrimaryFeed {
    url: String,
    fetcher: Arc<dyn Fetcher>,
    radius: Meters,
}

impl PrimaryFeed {
    pub fn new(url: impl Into<String>, fetcher: Arc<dyn Fetcher>, radius: Meters) -> Self {
        Self {
            url: url.into(),
            fetcher,
            radius,
        }
    }

    /// Fetch and normalize. Never panics on payload shape.
    pub fn fetch(
        &self,
        registry: &StationRegistry,
        now: DateTime<Utc>,
    ) -> Result<NormalizedFeed, FetchError> {
        let payload = self.fetcher.get_json(&self.url, &[]).inspect_err(|e| {
            warn!(error = %e, "primary feed fetch failed");
        })?;

        let Some(feed) = fuse(&payload, registry, self.radius, now, read_multi_pollutant) else {
            let shape = match &payload {
                Value::Object(obj) => obj.keys().cloned().collect::<Vec<_>>().join(","),
                other => type_name(other).to_string(),
            };
            warn!(payload_shape = %shape, "primary feed: could not locate record list");
            return Err(FetchError::Body("no record list in payload".into()));
        };

        info!(
            mapped = feed.mapped,
            total = feed.total,
            strategy = %feed.strategy,
            "primary feed normalized"
        );
        Ok(feed)
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
