//! Fallback PM2.5 feed with TTL cache and rolling-window limiter
//!
//! Consulted only when the primary feed fails. Results are cached for a TTL;
//! when the outbound budget is exhausted or the upstream fails, an expired
//! cache entry is served rather than failing outright.

use super::extract::{parse_coordinates, parse_name, parse_pm25, parse_timestamp};
use super::primary::{fuse, SensorReading};
use super::rate_limit::RollingWindowLimiter;
use super::{FeedOutcome, FetchError, Fetcher};
use crate::core_types::units::Meters;
use crate::error::EngineError;
use crate::estimator::PollutantAverages;
use crate::registry::StationRegistry;
use crate::store::LiveMaps;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default cache lifetime (10 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default outbound budget per rolling minute
pub const DEFAULT_CALLS_PER_MINUTE: usize = 6;

#[derive(Debug, Clone)]
struct CachedFeed {
    fetched_at: Instant,
    live: FxHashMap<String, f64>,
    live_ts: FxHashMap<String, String>,
}

impl CachedFeed {
    fn maps(&self) -> LiveMaps {
        (self.live.clone(), self.live_ts.clone())
    }
}

/// Read a single-pollutant record. `None` when coordinates or PM2.5 are missing.
pub fn read_pm25(obj: &Map<String, Value>) -> Option<SensorReading> {
    let (lat, lon) = parse_coordinates(obj)?;
    let pm25 = parse_pm25(obj)?;
    Some(SensorReading {
        name: parse_name(obj),
        lat,
        lon,
        pollutants: PollutantAverages::pm25_only(pm25),
        last_update: parse_timestamp(obj).or_else(|| {
            obj.get("date")
                .and_then(|d| d.get("utc"))
                .and_then(Value::as_str)
                .map(str::to_string)
        }),
    })
}

pub struct FallbackFeed {
    url: String,
    fetcher: Arc<dyn Fetcher>,
    radius: Meters,
    ttl: Duration,
    limiter: RollingWindowLimiter,
    cache: Mutex<Option<CachedFeed>>,
}

impl FallbackFeed {
    pub fn new(
        url: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        radius: Meters,
        ttl: Duration,
        calls_per_minute: usize,
    ) -> Self {
        Self {
            url: url.into(),
            fetcher,
            radius,
            ttl,
            limiter: RollingWindowLimiter::per_minute(calls_per_minute),
            cache: Mutex::new(None),
        }
    }

    fn cached(&self) -> Option<CachedFeed> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn refresh(&self, registry: &StationRegistry) -> Result<(FeedOutcome, LiveMaps), EngineError> {
        self.refresh_at(registry, Instant::now(), Utc::now())
    }

    /// Produce live maps from cache or upstream as of `now`.
    pub fn refresh_at(
        &self,
        registry: &StationRegistry,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<(FeedOutcome, LiveMaps), EngineError> {
        let cached = self.cached();

        if let Some(c) = &cached {
            if now.saturating_duration_since(c.fetched_at) < self.ttl {
                return Ok((FeedOutcome::Cached, c.maps()));
            }
        }

        if !self.limiter.try_acquire_at(now) {
            return match cached {
                Some(c) => {
                    warn!("fallback feed rate limited; serving stale cache");
                    Ok((FeedOutcome::StaleRateLimited, c.maps()))
                }
                None => {
                    warn!("fallback feed rate limited with empty cache");
                    Err(EngineError::RateLimited("fallback feed"))
                }
            };
        }

        let fetched = self.fetcher.get_json(&self.url, &[]).and_then(|payload| {
            fuse(&payload, registry, self.radius, wall, read_pm25)
                .ok_or_else(|| FetchError::Body("no record list in payload".into()))
        });

        match fetched {
            Ok(feed) => {
                info!(mapped = feed.mapped, total = feed.total, "fallback feed normalized");
                let outcome = FeedOutcome::Fresh {
                    mapped: feed.mapped,
                    total: feed.total,
                };
                let entry = CachedFeed {
                    fetched_at: now,
                    live: feed.live,
                    live_ts: feed.live_ts,
                };
                let maps = entry.maps();
                *self
                    .cache
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(entry);
                Ok((outcome, maps))
            }
            Err(e) => match cached {
                Some(c) => {
                    warn!(error = %e, "fallback feed failed; serving stale cache");
                    Ok((FeedOutcome::StaleUpstreamError, c.maps()))
                }
                None => {
                    warn!(error = %e, "fallback feed failed with empty cache");
                    Err(EngineError::Upstream(e))
                }
            },
        }
    }
}
