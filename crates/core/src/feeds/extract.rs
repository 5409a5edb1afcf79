//! Locating and reading sensor records in feeds of unknown shape
//!
//! Upstream payloads arrive as a bare list of state objects, as an object
//! wrapping that list under one of several key names, or nested arbitrarily
//! deep. [`locate_record_list`] runs an ordered chain of
//! [`RecordListStrategy`] values and takes the first hit;
//! [`flatten_records`] then walks the state → city → station hierarchy down
//! to individual sensor records.

use crate::estimator::PollutantAverages;
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Maximum nesting walked by the hierarchy flattener and the nested search
pub const MAX_DEPTH: usize = 8;

/// Keys under which a parent object holds its child list
const CHILD_KEYS: [&str; 4] = ["citiesInState", "cities", "stationsInCity", "stations"];

/// Fields whose presence marks an object as a state/city/station entry
const ID_LIKE_KEYS: [&str; 8] = [
    "stateId",
    "citiesInState",
    "cityId",
    "stationsInCity",
    "stationId",
    "siteId",
    "stationName",
    "id",
];

const NAME_KEYS: [&str; 5] = ["stationName", "Station", "StationName", "station", "location"];
const LAT_KEYS: [&str; 3] = ["latitude", "Latitude", "lat"];
const LON_KEYS: [&str; 4] = ["longitude", "Longitude", "lon", "lng"];
const TS_KEYS: [&str; 3] = ["lastUpdate", "lastUpdated", "last_update"];
const POLLUTANT_LIST_KEYS: [&str; 2] = ["pollutants", "measurements"];
const POLLUTANT_ID_KEYS: [&str; 4] = ["indexId", "pollutantId", "parameter", "id"];
const POLLUTANT_VALUE_KEYS: [&str; 3] = ["avg", "value", "average"];

/// One way of finding the record list inside a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordListStrategy {
    /// The payload is itself the list
    RootArray,
    /// The payload is an object holding the list under this key
    KnownKey(&'static str),
    /// First top-level list, in document order, whose first element carries
    /// an id-like field
    IdShaped,
    /// First top-level non-empty list of objects, in document order
    FirstObjectList,
    /// Breadth-first search through nested objects for an id-shaped list
    NestedSearch,
}

/// The default chain: known key names first, then structural sniffing.
pub const DEFAULT_CHAIN: [RecordListStrategy; 8] = [
    RecordListStrategy::RootArray,
    RecordListStrategy::KnownKey("data"),
    RecordListStrategy::KnownKey("results"),
    RecordListStrategy::KnownKey("stations"),
    RecordListStrategy::KnownKey("feeds"),
    RecordListStrategy::IdShaped,
    RecordListStrategy::FirstObjectList,
    RecordListStrategy::NestedSearch,
];

impl RecordListStrategy {
    pub fn name(&self) -> String {
        match self {
            RecordListStrategy::RootArray => "root_array".to_string(),
            RecordListStrategy::KnownKey(k) => format!("known_key:{k}"),
            RecordListStrategy::IdShaped => "id_shaped".to_string(),
            RecordListStrategy::FirstObjectList => "first_object_list".to_string(),
            RecordListStrategy::NestedSearch => "nested_search".to_string(),
        }
    }

    /// Try this strategy. Only non-empty lists count as a match.
    pub fn locate<'a>(&self, payload: &'a Value) -> Option<&'a [Value]> {
        match self {
            RecordListStrategy::RootArray => non_empty(payload),
            RecordListStrategy::KnownKey(key) => payload.get(*key).and_then(non_empty),
            RecordListStrategy::IdShaped => payload
                .as_object()?
                .values()
                .filter_map(non_empty)
                .find(|list| is_id_shaped(list)),
            RecordListStrategy::FirstObjectList => payload
                .as_object()?
                .values()
                .filter_map(non_empty)
                .find(|list| list[0].is_object()),
            RecordListStrategy::NestedSearch => nested_search(payload),
        }
    }
}

fn non_empty(v: &Value) -> Option<&[Value]> {
    v.as_array().map(Vec::as_slice).filter(|a| !a.is_empty())
}

fn is_id_shaped(list: &[Value]) -> bool {
    list.first()
        .and_then(Value::as_object)
        .is_some_and(|obj| ID_LIKE_KEYS.iter().any(|k| obj.contains_key(*k)))
}

fn nested_search(payload: &Value) -> Option<&[Value]> {
    let mut queue: VecDeque<(&Value, usize)> = VecDeque::from([(payload, 0)]);
    while let Some((node, depth)) = queue.pop_front() {
        if depth > MAX_DEPTH {
            continue;
        }
        match node {
            Value::Array(items) => {
                if is_id_shaped(items) {
                    return Some(items.as_slice());
                }
                queue.extend(items.iter().map(|v| (v, depth + 1)));
            }
            Value::Object(obj) => queue.extend(obj.values().map(|v| (v, depth + 1))),
            _ => {}
        }
    }
    None
}

/// Run `chain` in order; first success wins.
pub fn locate_with<'a>(
    chain: &[RecordListStrategy],
    payload: &'a Value,
) -> Option<(RecordListStrategy, &'a [Value])> {
    chain
        .iter()
        .find_map(|s| s.locate(payload).map(|list| (*s, list)))
}

/// Run the [`DEFAULT_CHAIN`].
pub fn locate_record_list(payload: &Value) -> Option<(RecordListStrategy, &[Value])> {
    locate_with(&DEFAULT_CHAIN, payload)
}

/// Walk state/city/station nesting down to leaf sensor records.
///
/// Non-object entries are skipped. An object with a non-empty child list is a
/// container; anything else is a record.
pub fn flatten_records(items: &[Value]) -> Vec<&Map<String, Value>> {
    let mut out = Vec::new();
    flatten_into(items, 0, &mut out);
    out
}

fn flatten_into<'a>(items: &'a [Value], depth: usize, out: &mut Vec<&'a Map<String, Value>>) {
    for item in items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let children = CHILD_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(non_empty));
        match children {
            Some(children) if depth < MAX_DEPTH => flatten_into(children, depth + 1, out),
            Some(_) => {}
            None => out.push(obj),
        }
    }
}

/// Parse a feed number: JSON number or numeric string. `""`, `"NA"` and
/// non-finite values are absent.
pub fn parse_number(v: &Value) -> Option<f64> {
    let x = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("na") {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        _ => return None,
    };
    x.is_finite().then_some(x)
}

fn first_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn first_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(parse_number)
}

/// Coordinates from top-level fields, else from a nested `coordinates` object.
pub fn parse_coordinates(obj: &Map<String, Value>) -> Option<(f64, f64)> {
    let read = |o: &Map<String, Value>| Some((first_number(o, &LAT_KEYS)?, first_number(o, &LON_KEYS)?));
    let (lat, lon) = read(obj).or_else(|| read(obj.get("coordinates")?.as_object()?))?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

/// Station name as reported by the feed
pub fn parse_name(obj: &Map<String, Value>) -> Option<String> {
    first_field(obj, &NAME_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Observation timestamp as reported by the feed
pub fn parse_timestamp(obj: &Map<String, Value>) -> Option<String> {
    first_field(obj, &TS_KEYS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Pollutant a feed identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pollutant {
    Pm25,
    Pm10,
    No2,
    Co,
}

impl Pollutant {
    /// Substring match against the fixed vocabulary, in priority order.
    pub fn classify(id: &str) -> Option<Self> {
        let id = id.trim().to_ascii_lowercase();
        if id.contains("pm2") {
            Some(Pollutant::Pm25)
        } else if id.contains("pm10") {
            Some(Pollutant::Pm10)
        } else if id.contains("no2") {
            Some(Pollutant::No2)
        } else if id.contains("co") {
            Some(Pollutant::Co)
        } else {
            None
        }
    }
}

fn pollutant_id(obj: &Map<String, Value>) -> Option<String> {
    match first_field(obj, &POLLUTANT_ID_KEYS)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pollutant averages from a record's pollutant sub-list.
///
/// For each pollutant the first entry that yields a value wins.
pub fn parse_pollutants(obj: &Map<String, Value>) -> PollutantAverages {
    let mut avgs = PollutantAverages::default();
    let Some(list) = POLLUTANT_LIST_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array))
    else {
        return avgs;
    };

    for entry in list.iter().filter_map(Value::as_object) {
        let Some(pollutant) = pollutant_id(entry).and_then(|id| Pollutant::classify(&id)) else {
            continue;
        };
        let value = first_number(entry, &POLLUTANT_VALUE_KEYS);
        let slot = match pollutant {
            Pollutant::Pm25 => &mut avgs.pm25,
            Pollutant::Pm10 => &mut avgs.pm10,
            Pollutant::No2 => &mut avgs.no2,
            Pollutant::Co => &mut avgs.co,
        };
        if slot.is_none() {
            *slot = value;
        }
    }
    avgs
}

/// PM2.5 from a single-pollutant record: either the record itself is a
/// PM2.5 measurement (`parameter` + `value`), or it carries a pollutant list,
/// or a bare `pm25` field.
pub fn parse_pm25(obj: &Map<String, Value>) -> Option<f64> {
    let own = pollutant_id(obj)
        .and_then(|id| Pollutant::classify(&id))
        .filter(|p| *p == Pollutant::Pm25)
        .and_then(|_| first_number(obj, &POLLUTANT_VALUE_KEYS));
    own.or_else(|| parse_pollutants(obj).pm25)
        .or_else(|| first_number(obj, &["pm25", "pm2_5", "PM2.5"]))
}
