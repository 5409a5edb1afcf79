//! Station registry and nearest-station matching

use crate::core_types::station::Station;
use crate::core_types::units::Meters;
use crate::geo::haversine;
use rustc_hash::FxHashMap;

/// Default gate for mapping a feed reading to a registry station (20 km)
pub const DEFAULT_MATCH_RADIUS: Meters = Meters::new(20_000.0);

/// Fixed set of monitoring stations, in load order
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: Vec<Station>,
    by_name: FxHashMap<String, usize>,
}

impl StationRegistry {
    /// Build a registry. Later duplicates of a station name are dropped so
    /// that name lookups stay unambiguous.
    pub fn new(stations: Vec<Station>) -> Self {
        let mut kept = Vec::with_capacity(stations.len());
        let mut by_name = FxHashMap::default();
        for station in stations {
            if by_name.contains_key(&station.name) {
                tracing::warn!(station = %station.name, "duplicate station name in registry, ignoring");
                continue;
            }
            by_name.insert(station.name.clone(), kept.len());
            kept.push(station);
        }
        Self {
            stations: kept,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Station> {
        self.by_name.get(name).map(|&i| &self.stations[i])
    }

    /// Nearest station to a point, if one lies within `radius`.
    ///
    /// Ties on exactly equal distance resolve to the station loaded first.
    pub fn nearest(&self, lat: f64, lon: f64, radius: Meters) -> Option<(&Station, Meters)> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        let mut best: Option<(&Station, Meters)> = None;
        for station in &self.stations {
            let d = haversine(lat, lon, station.lat, station.lon);
            if !d.is_finite() {
                continue;
            }
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((station, d)),
            }
        }
        best.filter(|(_, d)| *d <= radius)
    }

    /// Stations belonging to a city.
    ///
    /// Exact (case-insensitive) city match first; if nothing matches, any
    /// station whose city contains the query, or is contained by it.
    pub fn stations_in_city(&self, city: &str) -> Vec<&Station> {
        let query = normalize_city(city);
        if query.is_empty() {
            return Vec::new();
        }
        let exact: Vec<&Station> = self
            .stations
            .iter()
            .filter(|s| normalize_city(&s.city) == query)
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        self.stations
            .iter()
            .filter(|s| {
                let c = normalize_city(&s.city);
                !c.is_empty() && (c.contains(&query) || query.contains(&c))
            })
            .collect()
    }

    /// Mean coordinates of a city's stations, or `None` if the city is unknown.
    pub fn city_coordinates(&self, city: &str) -> Option<(f64, f64)> {
        let stations = self.stations_in_city(city);
        if stations.is_empty() {
            return None;
        }
        let n = stations.len() as f64;
        let lat = stations.iter().map(|s| s.lat).sum::<f64>() / n;
        let lon = stations.iter().map(|s| s.lon).sum::<f64>() / n;
        Some((lat, lon))
    }
}

/// Cache/lookup key for a city name.
pub fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::offset;

    fn station(name: &str, city: &str, lat: f64, lon: f64) -> Station {
        Station {
            id: name.to_string(),
            name: name.to_string(),
            city: city.to_string(),
            state: "Delhi".to_string(),
            lat,
            lon,
        }
    }

    #[test]
    fn test_nearest_respects_radius() {
        let reg = StationRegistry::new(vec![station("A", "Delhi", 28.6, 77.2)]);

        let (lat, lon) = offset(28.6, 77.2, 15_000.0, 0.0);
        let (s, d) = reg.nearest(lat, lon, DEFAULT_MATCH_RADIUS).unwrap();
        assert_eq!(s.name, "A");
        assert!((*d - 15_000.0).abs() < 50.0);

        let (lat, lon) = offset(28.6, 77.2, 25_000.0, 0.0);
        assert!(reg.nearest(lat, lon, DEFAULT_MATCH_RADIUS).is_none());
    }

    #[test]
    fn test_nearest_tie_prefers_registry_order() {
        // Two stations mirrored across the query point
        let reg = StationRegistry::new(vec![
            station("East", "X", 10.0, 10.01),
            station("West", "X", 10.0, 9.99),
        ]);
        let (s, _) = reg.nearest(10.0, 10.0, DEFAULT_MATCH_RADIUS).unwrap();
        assert_eq!(s.name, "East");
    }

    #[test]
    fn test_nearest_rejects_non_finite() {
        let reg = StationRegistry::new(vec![station("A", "Delhi", 28.6, 77.2)]);
        assert!(reg.nearest(f64::NAN, 77.2, DEFAULT_MATCH_RADIUS).is_none());
    }

    #[test]
    fn test_city_lookup_exact_then_substring() {
        let reg = StationRegistry::new(vec![
            station("A", "Delhi", 28.0, 77.0),
            station("B", "Delhi", 29.0, 78.0),
            station("C", "New Delhi", 30.0, 79.0),
            station("D", "Navi Mumbai", 19.0, 73.0),
        ]);
        assert_eq!(reg.city_coordinates(" delhi "), Some((28.5, 77.5)));
        assert_eq!(reg.stations_in_city("Mumbai").len(), 1);
        assert!(reg.city_coordinates("Chennai").is_none());
        assert!(reg.city_coordinates("  ").is_none());
    }

    #[test]
    fn test_duplicate_names_dropped() {
        let reg = StationRegistry::new(vec![
            station("A", "Delhi", 28.0, 77.0),
            station("A", "Pune", 18.0, 73.0),
        ]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("A").unwrap().city, "Delhi");
    }
}
