//! Engine coordinator
//!
//! Owns every piece of process-wide state: the concentration store, the
//! upstream clients with their caches and limiters, the profile resolver and
//! the intervention log. Request operations and the background refresh run
//! concurrently against one shared `Arc<Engine>`.

use crate::config::{EngineConfig, Secrets};
use crate::core_types::profile::EnvironmentalProfile;
use crate::core_types::station::{StationSnapshot, StationView};
use crate::core_types::units::Meters;
use crate::datasets::{DatasetReader, Datasets, HistoricalTable};
use crate::dispersion::{DispersionEngine, DispersionGrid, SourceStation, Wind, WindSource};
use crate::error::EngineError;
use crate::estimator::round3;
use crate::feeds::{FallbackFeed, FeedOutcome, Fetcher, HttpFetcher, PrimaryFeed};
use crate::integrity::IntegritySigner;
use crate::intervention::{
    intervention_effect, InterventionLog, InterventionRecord, WeatherScenario,
};
use crate::profiles::ProfileResolver;
use crate::registry::StationRegistry;
use crate::store::{ConcentrationStore, ResolvedStore, StoreTarget};
use crate::weather::{WeatherClient, WeatherReport};
use chrono::{Datelike, Local, NaiveDate, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Method label recorded when a request names none
pub const DEFAULT_METHOD: &str = "urban_greening";

/// HTTP clients for the three upstream services
#[derive(Clone)]
pub struct Upstreams {
    pub primary: Arc<dyn Fetcher>,
    pub fallback: Arc<dyn Fetcher>,
    pub weather: Arc<dyn Fetcher>,
}

impl Upstreams {
    /// Blocking HTTP clients with the configured per-service timeouts
    pub fn http(config: &EngineConfig) -> Result<Self, EngineError> {
        let client = |secs: u64| -> Result<Arc<dyn Fetcher>, EngineError> {
            let fetcher = HttpFetcher::new(Duration::from_secs(secs.max(1)))
                .map_err(|e| EngineError::Config(format!("http client: {e}")))?;
            Ok(Arc::new(fetcher))
        };
        Ok(Self {
            primary: client(config.feeds.primary_timeout_secs)?,
            fallback: client(config.feeds.fallback_timeout_secs)?,
            weather: client(config.weather.timeout_secs)?,
        })
    }
}

/// An intervention request from a collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionRequest {
    pub station: String,
    /// Registry id, used for the reference-profile lookup when given; must
    /// belong to `station`
    pub station_id: Option<String>,
    pub target: StoreTarget,
    pub method: Option<String>,
    /// Planner efficiency, percent in `[0, 50]`
    pub efficiency: Option<f64>,
    /// Explicit weather scenario
    pub weather: Option<WeatherScenario>,
    /// Use the live weather of the station's city when no scenario is given
    pub use_live_weather: bool,
    /// Echoed snapshot; verified against `token` before anything changes
    pub snapshot: Option<StationSnapshot>,
    pub token: Option<String>,
}

impl InterventionRequest {
    pub fn new(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            ..Self::default()
        }
    }
}

/// Result of an applied intervention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterventionOutcome {
    pub station: String,
    pub city: String,
    pub applied_to: ResolvedStore,
    pub before: f64,
    pub after: f64,
    pub ratio: f64,
    pub ndvi: f64,
    pub albedo: f64,
    pub lulc: String,
    pub lulc_factor: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherScenario>,
    /// Token over the post-intervention snapshot
    pub token: String,
}

/// What a refresh pass did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RefreshReport {
    /// Primary feed replaced the live map
    Primary {
        mapped: usize,
        total: usize,
        strategy: String,
    },
    /// Primary failed; the fallback feed's maps replaced the live map
    Fallback {
        primary_error: String,
        outcome: FeedOutcome,
        stations: usize,
    },
    /// Both feeds failed; the live map is unchanged
    Failed {
        primary_error: String,
        fallback_error: String,
    },
}

impl RefreshReport {
    pub fn updated(&self) -> bool {
        !matches!(self, RefreshReport::Failed { .. })
    }
}

pub struct Engine {
    registry: StationRegistry,
    id_to_name: FxHashMap<String, String>,
    history: HistoricalTable,
    store: RwLock<ConcentrationStore>,
    profiles: ProfileResolver,
    primary: PrimaryFeed,
    fallback: FallbackFeed,
    weather: WeatherClient,
    dispersion: DispersionEngine,
    signer: IntegritySigner,
    log: InterventionLog,
    refresh_lock: Mutex<()>,
}

impl Engine {
    /// Build an engine from loaded datasets and upstream clients. The
    /// baseline store starts empty; see [`Engine::switch_baseline`].
    pub fn assemble(
        config: &EngineConfig,
        secrets: &Secrets,
        datasets: Datasets,
        upstreams: Upstreams,
    ) -> Result<Self, EngineError> {
        let Datasets {
            stations,
            id_to_name,
            history,
            env_factors,
        } = datasets;

        let registry = StationRegistry::new(stations);
        if registry.is_empty() {
            warn!("station registry is empty");
        }
        let radius = Meters::new(config.feeds.match_radius_m);
        let session_seed = config.profiles.session_seed.unwrap_or_else(|| {
            Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_else(|| Utc::now().timestamp()) as u64
        });

        let profiles = ProfileResolver::new(env_factors, &id_to_name, session_seed);
        info!(
            stations = registry.len(),
            reference_profiles = profiles.reference_len(),
            "engine assembled"
        );

        Ok(Self {
            profiles,
            primary: PrimaryFeed::new(config.feeds.primary_url.clone(), upstreams.primary, radius),
            fallback: FallbackFeed::new(
                config.feeds.fallback_url.clone(),
                upstreams.fallback,
                radius,
                Duration::from_secs(config.feeds.fallback_ttl_secs),
                config.feeds.fallback_calls_per_minute,
            ),
            weather: WeatherClient::new(
                config.weather.provider,
                config.weather.url.clone(),
                secrets.weather_api_key.clone(),
                upstreams.weather,
                Duration::from_secs(config.weather.ttl_secs),
                config.weather.calls_per_minute,
                config.weather.cache_path.clone(),
            ),
            dispersion: DispersionEngine::new(config.dispersion.clone()),
            signer: IntegritySigner::new(&secrets.token_secret)?,
            registry,
            id_to_name,
            history,
            store: RwLock::new(ConcentrationStore::new()),
            log: InterventionLog::new(),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Load datasets, connect upstreams and install today's baseline.
    pub fn from_config(config: &EngineConfig, secrets: &Secrets) -> Result<Self, EngineError> {
        let reader = if config.data.encrypted {
            let key = secrets.data_key.as_deref().ok_or_else(|| {
                EngineError::Config("encrypted datasets need a data key".into())
            })?;
            DatasetReader::encrypted(&config.data.dir, key)?
        } else {
            DatasetReader::plain(&config.data.dir)
        };
        let datasets = reader.load()?;
        let engine = Self::assemble(config, secrets, datasets, Upstreams::http(config)?)?;

        let today = Local::now().date_naive();
        match engine.switch_baseline(today.month(), today.day()) {
            Ok(n) => info!(stations = n, "baseline installed for today"),
            Err(e) => warn!(error = %e, "no baseline for today; baseline store empty"),
        }
        Ok(engine)
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn signer(&self) -> &IntegritySigner {
        &self.signer
    }

    /// Run `f` against a consistent view of the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&ConcentrationStore) -> R) -> R {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        f(&store)
    }

    fn profile_for(&self, id: Option<&str>, name: &str) -> Result<EnvironmentalProfile, EngineError> {
        self.profiles.resolve(id, name).ok_or_else(|| {
            EngineError::NotFound(format!("no environmental profile for station '{name}'"))
        })
    }

    /// Every station with its concentrations, profile and signed snapshot.
    pub fn stations(&self) -> Vec<StationView> {
        let values: Vec<(Option<f64>, Option<f64>, Option<String>)> = self.with_store(|store| {
            self.registry
                .iter()
                .map(|s| {
                    (
                        store.baseline(&s.name),
                        store.live(&s.name),
                        store.live_ts(&s.name).map(str::to_string),
                    )
                })
                .collect()
        });

        self.registry
            .iter()
            .zip(values)
            .map(|(station, (baseline, live, live_ts))| {
                let profile = self.profiles.resolve(Some(station.id.as_str()), &station.name);
                let (ndvi, albedo, lulc) = profile
                    .map(|p| (round3(p.ndvi), round3(p.albedo), p.lulc))
                    .unwrap_or_default();
                let mut view = StationView {
                    id: station.id.clone(),
                    name: station.name.clone(),
                    city: station.city.clone(),
                    state: station.state.clone(),
                    lat: station.lat,
                    lon: station.lon,
                    baseline,
                    live,
                    live_ts,
                    ndvi,
                    albedo,
                    lulc,
                    token: None,
                };
                view.token = view.snapshot().map(|s| self.signer.sign(&s));
                view
            })
            .collect()
    }

    /// One station's row
    pub fn station(&self, name: &str) -> Result<StationView, EngineError> {
        self.stations()
            .into_iter()
            .find(|v| v.name == name)
            .ok_or_else(|| EngineError::NotFound(format!("station '{name}'")))
    }

    /// Apply an intervention to the store selected by `request.target`.
    ///
    /// An echoed snapshot is verified before anything else; the store read,
    /// effect computation and write happen under one write lock.
    pub fn apply_intervention(
        &self,
        request: &InterventionRequest,
    ) -> Result<InterventionOutcome, EngineError> {
        let name = request.station.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidParameter("station is required".into()));
        }
        let station = self
            .registry
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("station '{name}'")))?;

        match (&request.snapshot, &request.token) {
            (Some(snapshot), Some(token)) => {
                if snapshot.name != station.name || !self.signer.verify(snapshot, token) {
                    warn!(station = %station.name, "snapshot token mismatch");
                    return Err(EngineError::IntegrityMismatch(station.name.clone()));
                }
            }
            (None, None) => {}
            _ => {
                return Err(EngineError::InvalidParameter(
                    "snapshot and token must be supplied together".into(),
                ))
            }
        }

        let id = match request.station_id.as_deref().map(str::trim) {
            None | Some("") => station.id.as_str(),
            Some(id) if id == station.id || self.id_to_name.get(id) == Some(&station.name) => id,
            Some(id) => {
                return Err(EngineError::InvalidParameter(format!(
                    "station id '{id}' does not belong to station '{}'",
                    station.name
                )))
            }
        };
        let profile = self.profile_for(Some(id), &station.name)?;
        let lulc_factor = profile.lulc_factor();
        let efficiency = request.efficiency.filter(|e| e.is_finite());

        let scenario = match request.weather {
            Some(scenario) => Some(scenario),
            None if request.use_live_weather => self.live_scenario(&station.city),
            None => None,
        };

        let (applied_to, before, effect) = {
            let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
            let (applied_to, before) = store.resolve(&station.name, request.target).ok_or_else(|| {
                EngineError::NotFound(format!(
                    "no baseline or live concentration for station '{}'",
                    station.name
                ))
            })?;
            let effect = intervention_effect(
                before,
                profile.ndvi,
                profile.albedo,
                lulc_factor,
                efficiency,
                scenario.as_ref(),
            );
            store.set(applied_to, &station.name, effect.reduced);
            (applied_to, before, effect)
        };

        let snapshot = StationSnapshot {
            name: station.name.clone(),
            city: station.city.clone(),
            concentration: effect.reduced,
            ndvi: round3(profile.ndvi),
            albedo: round3(profile.albedo),
            lulc: profile.lulc.clone(),
        };
        let token = self.signer.sign(&snapshot);

        info!(
            station = %station.name,
            applied_to = ?applied_to,
            before,
            after = effect.reduced,
            ratio = effect.ratio,
            "intervention applied"
        );
        self.log.append(InterventionRecord {
            station: station.name.clone(),
            city: station.city.clone(),
            method: request
                .method
                .clone()
                .unwrap_or_else(|| DEFAULT_METHOD.to_string()),
            applied_to,
            before,
            after: effect.reduced,
            ratio: effect.ratio,
            efficiency,
            weather: scenario,
            applied_at: Utc::now(),
        });

        Ok(InterventionOutcome {
            station: station.name.clone(),
            city: station.city.clone(),
            applied_to,
            before,
            after: effect.reduced,
            ratio: effect.ratio,
            ndvi: snapshot.ndvi,
            albedo: snapshot.albedo,
            lulc: snapshot.lulc,
            lulc_factor,
            weather: scenario,
            token,
        })
    }

    /// Scenario from the city's current weather; `None` when unavailable.
    fn live_scenario(&self, city: &str) -> Option<WeatherScenario> {
        match self.weather.current(&self.registry, city) {
            Ok(Some(report)) => Some(WeatherScenario::from_snapshot(&report.snapshot)),
            Ok(None) => None,
            Err(e) => {
                warn!(city, error = %e, "live weather unavailable; intervention without weather");
                None
            }
        }
    }

    /// Current weather for a city; `Ok(None)` when no station is in it.
    pub fn weather(&self, city: &str) -> Result<Option<WeatherReport>, EngineError> {
        self.weather.current(&self.registry, city)
    }

    /// Dispersion grid for a city.
    ///
    /// Wind comes from `wind_override`, else the city's weather, else the
    /// configured default. An unknown city yields an empty grid.
    pub fn dispersion(&self, city: &str, wind_override: Option<Wind>) -> DispersionGrid {
        let stations = self.registry.stations_in_city(city);
        let sources: Vec<SourceStation> = self.with_store(|store| {
            stations
                .iter()
                .filter_map(|s| {
                    store.current(&s.name).map(|concentration| SourceStation {
                        lat: s.lat,
                        lon: s.lon,
                        concentration,
                    })
                })
                .collect()
        });

        let (wind, wind_source) = match wind_override {
            Some(wind) => (wind, WindSource::Override),
            None if sources.is_empty() => (self.dispersion.config().default_wind(), WindSource::Default),
            None => match self.weather.current(&self.registry, city) {
                Ok(Some(report)) => (
                    Wind {
                        speed: report.snapshot.wind_speed,
                        direction: report.snapshot.wind_direction,
                    },
                    WindSource::Weather,
                ),
                Ok(None) => (self.dispersion.config().default_wind(), WindSource::Default),
                Err(e) => {
                    warn!(city, error = %e, "weather unavailable; using default wind");
                    (self.dispersion.config().default_wind(), WindSource::Default)
                }
            },
        };
        self.dispersion.compute(city, &sources, wind, wind_source)
    }

    /// Refresh the live store: primary feed, then the fallback feed if the
    /// primary fails. Never fails; the report says what happened.
    pub fn refresh_now(&self) -> RefreshReport {
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let primary_error = match self.primary.fetch(&self.registry, Utc::now()) {
            Ok(feed) => {
                let report = RefreshReport::Primary {
                    mapped: feed.mapped,
                    total: feed.total,
                    strategy: feed.strategy.clone(),
                };
                self.replace_live(feed.into_maps());
                return report;
            }
            Err(e) => e,
        };

        match self.fallback.refresh(&self.registry) {
            Ok((outcome, maps)) => {
                let stations = maps.0.len();
                self.replace_live(maps);
                if outcome.is_stale() {
                    warn!(?outcome, stations, "live store refreshed from stale fallback data");
                } else {
                    info!(?outcome, stations, "live store refreshed from fallback feed");
                }
                RefreshReport::Fallback {
                    primary_error: primary_error.to_string(),
                    outcome,
                    stations,
                }
            }
            Err(e) => {
                warn!(primary = %primary_error, fallback = %e, "refresh failed; live store unchanged");
                RefreshReport::Failed {
                    primary_error: primary_error.to_string(),
                    fallback_error: e.to_string(),
                }
            }
        }
    }

    fn replace_live(&self, maps: crate::store::LiveMaps) {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace_live(maps);
    }

    /// Rebuild the baseline from the history rows of a calendar date.
    ///
    /// Returns the number of stations in the new baseline. A date with no
    /// rows is `NotFound` and leaves the store untouched.
    pub fn switch_baseline(&self, month: u32, day: u32) -> Result<usize, EngineError> {
        // Leap year so that 29 February is addressable
        if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
            return Err(EngineError::InvalidParameter(format!(
                "invalid calendar date {month:02}-{day:02}"
            )));
        }
        let baseline = self
            .history
            .baseline_for(month, day, &self.id_to_name)
            .ok_or_else(|| EngineError::NotFound(format!("no history rows for {month:02}-{day:02}")))?;
        let count = baseline.len();
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace_baseline(baseline, (month, day));
        info!(month, day, stations = count, "baseline switched");
        Ok(count)
    }

    /// Every applied intervention, oldest first
    pub fn interventions(&self) -> Vec<InterventionRecord> {
        self.log.snapshot()
    }
}
