//! Cached, rate-limited weather client
//!
//! Snapshots are cached per normalized city name for a TTL and persisted as
//! JSON so they survive restarts. Load/save failures are logged and ignored.

use super::{parse_observation, WeatherProvider, WeatherSnapshot};
use crate::error::EngineError;
use crate::feeds::{Fetcher, RollingWindowLimiter};
use crate::registry::{normalize_city, StationRegistry};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default cache lifetime (15 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(900);

/// Default outbound budget per rolling minute
pub const DEFAULT_CALLS_PER_MINUTE: usize = 30;

/// How a weather lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    Cached,
    StaleRateLimited,
    StaleUpstreamError,
}

/// A snapshot plus how it was obtained
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    #[serde(flatten)]
    pub snapshot: WeatherSnapshot,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedWeather {
    fetched_at: DateTime<Utc>,
    snapshot: WeatherSnapshot,
}

/// Errors that can occur with weather cache persistence
#[derive(Debug)]
pub enum CacheFileError {
    /// Failed to read file
    LoadFailed(String),
    /// Failed to parse file contents
    ParseFailed(String),
    /// Failed to serialize cache
    SerializeFailed(String),
    /// Failed to write file
    SaveFailed(String),
}

impl std::fmt::Display for CacheFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheFileError::LoadFailed(msg) => write!(f, "Failed to load: {msg}"),
            CacheFileError::ParseFailed(msg) => write!(f, "Failed to parse: {msg}"),
            CacheFileError::SerializeFailed(msg) => write!(f, "Failed to serialize: {msg}"),
            CacheFileError::SaveFailed(msg) => write!(f, "Failed to save: {msg}"),
        }
    }
}

impl std::error::Error for CacheFileError {}

fn load_cache(path: &Path) -> Result<FxHashMap<String, CachedWeather>, CacheFileError> {
    let contents =
        fs::read_to_string(path).map_err(|e| CacheFileError::LoadFailed(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| CacheFileError::ParseFailed(e.to_string()))
}

fn save_cache(path: &Path, cache: &FxHashMap<String, CachedWeather>) -> Result<(), CacheFileError> {
    let contents = serde_json::to_string_pretty(cache)
        .map_err(|e| CacheFileError::SerializeFailed(e.to_string()))?;
    // Write-then-rename so a crash never leaves a truncated cache behind
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(|e| CacheFileError::SaveFailed(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| CacheFileError::SaveFailed(e.to_string()))
}

pub struct WeatherClient {
    provider: WeatherProvider,
    url: String,
    api_key: Option<String>,
    fetcher: Arc<dyn Fetcher>,
    ttl: Duration,
    limiter: RollingWindowLimiter,
    cache: Mutex<FxHashMap<String, CachedWeather>>,
    cache_path: Option<PathBuf>,
    /// Held across copy-and-write so the file always receives the newest copy
    save_lock: Mutex<()>,
}

impl WeatherClient {
    /// Create a client, warming the cache from `cache_path` when it exists.
    pub fn new(
        provider: WeatherProvider,
        url: impl Into<String>,
        api_key: Option<String>,
        fetcher: Arc<dyn Fetcher>,
        ttl: Duration,
        calls_per_minute: usize,
        cache_path: Option<PathBuf>,
    ) -> Self {
        let cache = match cache_path.as_deref() {
            Some(path) if path.exists() => match load_cache(path) {
                Ok(cache) => {
                    info!(entries = cache.len(), path = %path.display(), "loaded weather cache");
                    cache
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "ignoring unreadable weather cache");
                    FxHashMap::default()
                }
            },
            _ => FxHashMap::default(),
        };
        Self {
            provider,
            url: url.into(),
            api_key,
            fetcher,
            ttl,
            limiter: RollingWindowLimiter::per_minute(calls_per_minute),
            cache: Mutex::new(cache),
            cache_path,
            save_lock: Mutex::new(()),
        }
    }

    fn cached(&self, key: &str) -> Option<CachedWeather> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of cities currently cached
    pub fn cached_cities(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn current(
        &self,
        registry: &StationRegistry,
        city: &str,
    ) -> Result<Option<WeatherReport>, EngineError> {
        self.current_at(registry, city, Instant::now(), Utc::now())
    }

    /// Current weather for `city` as of `wall`.
    ///
    /// `Ok(None)` means the city matches no registry station. Rate-limit and
    /// upstream failures degrade to an expired cache entry when one exists.
    pub fn current_at(
        &self,
        registry: &StationRegistry,
        city: &str,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<Option<WeatherReport>, EngineError> {
        let key = normalize_city(city);
        let cached = self.cached(&key);

        if let Some(c) = &cached {
            let age = (wall - c.fetched_at).to_std().unwrap_or(Duration::ZERO);
            if age < self.ttl {
                debug!(city = %key, "weather cache hit");
                return Ok(Some(WeatherReport {
                    snapshot: c.snapshot.clone(),
                    freshness: Freshness::Cached,
                }));
            }
        }

        let Some(coords) = registry.city_coordinates(city) else {
            debug!(city = %key, "no stations match city");
            return Ok(None);
        };

        if !self.limiter.try_acquire_at(now) {
            return match cached {
                Some(c) => {
                    warn!(city = %key, "weather rate limited; serving stale cache");
                    Ok(Some(WeatherReport {
                        snapshot: c.snapshot,
                        freshness: Freshness::StaleRateLimited,
                    }))
                }
                None => Err(EngineError::RateLimited("weather")),
            };
        }

        let query = self.provider.query(coords.0, coords.1, self.api_key.as_deref());
        let fetched = self
            .fetcher
            .get_json(&self.url, &query)
            .and_then(|body| parse_observation(&body));

        match fetched {
            Ok(obs) => {
                let snapshot = WeatherSnapshot::from_observation(city, coords, obs, wall);
                info!(
                    city = %key,
                    wind = %snapshot.wind_speed,
                    direction = %snapshot.wind_direction,
                    "weather refreshed"
                );
                self.store(&key, wall, snapshot.clone());
                Ok(Some(WeatherReport {
                    snapshot,
                    freshness: Freshness::Fresh,
                }))
            }
            Err(e) => match cached {
                Some(c) => {
                    warn!(city = %key, error = %e, "weather fetch failed; serving stale cache");
                    Ok(Some(WeatherReport {
                        snapshot: c.snapshot,
                        freshness: Freshness::StaleUpstreamError,
                    }))
                }
                None => {
                    warn!(city = %key, error = %e, "weather fetch failed with empty cache");
                    Err(EngineError::Upstream(e))
                }
            },
        }
    }

    fn store(&self, key: &str, fetched_at: DateTime<Utc>, snapshot: WeatherSnapshot) {
        let _saving = self
            .cache_path
            .as_ref()
            .map(|_| self.save_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
        let copy = {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cache.insert(
                key.to_string(),
                CachedWeather {
                    fetched_at,
                    snapshot,
                },
            );
            self.cache_path.as_ref().map(|_| cache.clone())
        };
        if let (Some(path), Some(copy)) = (&self.cache_path, copy) {
            if let Err(e) = save_cache(path, &copy) {
                warn!(error = %e, path = %path.display(), "could not persist weather cache");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::station::Station;
    use crate::error::ErrorCode;
    use crate::feeds::{CannedFetcher, FetchError};
    use crate::core_types::units::{Degrees, MetersPerSecond};
    use crate::weather::{DispersionClass, Observation};
    use serde_json::json;

    fn registry() -> StationRegistry {
        StationRegistry::new(vec![
            Station {
                id: "KA001".into(),
                name: "Hebbal".into(),
                city: "Bengaluru".into(),
                state: "Karnataka".into(),
                lat: 13.0,
                lon: 77.5,
            },
            Station {
                id: "KA002".into(),
                name: "Silk Board".into(),
                city: "Bengaluru".into(),
                state: "Karnataka".into(),
                lat: 12.9,
                lon: 77.7,
            },
        ])
    }

    fn body(speed_kmh: f64) -> serde_json::Value {
        json!({"current": {"temperature_2m": 24.0, "wind_speed_10m": speed_kmh, "wind_direction_10m": 200}})
    }

    fn client(fetcher: Arc<CannedFetcher>, per_minute: usize, path: Option<PathBuf>) -> WeatherClient {
        WeatherClient::new(
            WeatherProvider::OpenMeteo,
            "http://weather",
            None,
            fetcher,
            DEFAULT_TTL,
            per_minute,
            path,
        )
    }

    #[test]
    fn test_fetch_then_cache_hit() {
        let fetcher = Arc::new(CannedFetcher::always(body(5.4)));
        let c = client(fetcher.clone(), 10, None);
        let t0 = Instant::now();
        let w0 = Utc::now();

        let r = c.current_at(&registry(), "Bengaluru", t0, w0).unwrap().unwrap();
        assert_eq!(r.freshness, Freshness::Fresh);
        assert_eq!(r.snapshot.dispersion, DispersionClass::Poor);
        assert!((r.snapshot.lat - 12.95).abs() < 1e-9);

        let r = c
            .current_at(&registry(), " bengaluru ", t0, w0 + chrono::Duration::minutes(5))
            .unwrap()
            .unwrap();
        assert_eq!(r.freshness, Freshness::Cached);
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_unknown_city_is_none() {
        let fetcher = Arc::new(CannedFetcher::always(body(10.0)));
        let c = client(fetcher.clone(), 10, None);
        assert!(c.current(&registry(), "Atlantis").unwrap().is_none());
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_stale_paths() {
        let fetcher = Arc::new(CannedFetcher::new([Ok(body(20.0)), Err(FetchError::Timeout)]));
        let c = client(fetcher, 2, None);
        let t0 = Instant::now();
        let w0 = Utc::now();
        let later = w0 + chrono::Duration::minutes(30);

        c.current_at(&registry(), "Bengaluru", t0, w0).unwrap();
        let r = c.current_at(&registry(), "Bengaluru", t0, later).unwrap().unwrap();
        assert_eq!(r.freshness, Freshness::StaleUpstreamError);
        let r = c.current_at(&registry(), "Bengaluru", t0, later).unwrap().unwrap();
        assert_eq!(r.freshness, Freshness::StaleRateLimited);
    }

    #[test]
    fn test_rate_limited_without_cache() {
        let fetcher = Arc::new(CannedFetcher::failing(FetchError::Status(500)));
        let c = client(fetcher, 1, None);
        let t0 = Instant::now();
        let err = c.current_at(&registry(), "Bengaluru", t0, Utc::now()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Upstream);
        let err = c.current_at(&registry(), "Bengaluru", t0, Utc::now()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateLimited);
    }

    #[test]
    fn test_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather_cache.json");

        let first = client(Arc::new(CannedFetcher::always(body(7.2))), 10, Some(path.clone()));
        first.current(&registry(), "Bengaluru").unwrap().unwrap();
        assert!(path.exists());

        // A new client whose upstream is down still answers from the file
        let second = client(
            Arc::new(CannedFetcher::failing(FetchError::Timeout)),
            10,
            Some(path),
        );
        assert_eq!(second.cached_cities(), 1);
        let r = second.current(&registry(), "Bengaluru").unwrap().unwrap();
        assert_eq!(r.freshness, Freshness::Cached);
        assert!((*r.snapshot.wind_speed - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_saves_keep_every_city() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather_cache.json");
        let c = Arc::new(client(
            Arc::new(CannedFetcher::failing(FetchError::Timeout)),
            10,
            Some(path.clone()),
        ));

        let workers: Vec<_> = (0..16)
            .map(|i| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    let city = format!("city-{i}");
                    let obs = Observation {
                        temperature_c: Some(20.0),
                        wind_speed: MetersPerSecond::new(3.0),
                        wind_direction: Degrees::new(90.0),
                        mixing_height_m: None,
                    };
                    let snapshot =
                        WeatherSnapshot::from_observation(&city, (13.0, 77.5), obs, Utc::now());
                    c.store(&city, Utc::now(), snapshot);
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(load_cache(&path).unwrap().len(), 16);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_cache_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather_cache.json");
        fs::write(&path, "{not json").unwrap();
        let c = client(Arc::new(CannedFetcher::always(body(7.2))), 10, Some(path));
        assert_eq!(c.cached_cities(), 0);
    }
}
