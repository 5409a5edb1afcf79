//! Engine configuration
//!
//! Non-secret settings come from a TOML file whose every section and field
//! is optional; secrets come only from the environment.

use crate::dispersion::DispersionConfig;
use crate::error::EngineError;
use crate::weather::WeatherProvider;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the integrity-token secret (required)
pub const TOKEN_SECRET_ENV: &str = "AIRTWIN_TOKEN_SECRET";

/// Environment variable holding the Fernet dataset key
pub const DATA_KEY_ENV: &str = "AIRTWIN_DATA_KEY";

/// Environment variable holding the weather API key (optional)
pub const WEATHER_API_KEY_ENV: &str = "AIRTWIN_WEATHER_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the station datasets
    pub dir: PathBuf,
    /// Read `<file>.enc` and decrypt with [`DATA_KEY_ENV`]
    pub encrypted: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            encrypted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub primary_url: String,
    pub fallback_url: String,

    /// Maximum distance from a feed sensor to its matched station (m)
    pub match_radius_m: f64,

    pub primary_timeout_secs: u64,
    pub fallback_timeout_secs: u64,

    /// Fallback cache lifetime
    pub fallback_ttl_secs: u64,
    pub fallback_calls_per_minute: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            primary_url: "https://airquality.cpcb.gov.in/caaqms/iit_rss_feed_with_coordinates"
                .to_string(),
            fallback_url: "https://api.openaq.org/v2/latest?country=IN&parameter=pm25&limit=1000"
                .to_string(),
            match_radius_m: 20_000.0,
            primary_timeout_secs: 15,
            fallback_timeout_secs: 10,
            fallback_ttl_secs: 600,
            fallback_calls_per_minute: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub provider: WeatherProvider,
    pub url: String,
    pub timeout_secs: u64,
    pub ttl_secs: u64,
    pub calls_per_minute: usize,
    /// JSON file the per-city cache is persisted to; `None` keeps it in memory
    pub cache_path: Option<PathBuf>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            provider: WeatherProvider::OpenMeteo,
            url: "https://api.open-meteo.com/v1/forecast".to_string(),
            timeout_secs: 8,
            ttl_secs: 900,
            calls_per_minute: 30,
            cache_path: Some(PathBuf::from("weather_cache.json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Seed for synthetic profiles; taken from the startup clock when unset
    pub session_seed: Option<u64>,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data: DataConfig,
    pub feeds: FeedConfig,
    pub weather: WeatherConfig,
    pub dispersion: DispersionConfig,
    pub refresh: RefreshConfig,
    pub profiles: ProfileConfig,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, EngineError> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }
}

/// Secrets read from the environment at startup
#[derive(Clone, Default)]
pub struct Secrets {
    pub token_secret: String,
    pub data_key: Option<String>,
    pub weather_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("data_key", &self.data_key.as_ref().map(|_| "<set>"))
            .field("weather_api_key", &self.weather_api_key.as_ref().map(|_| "<set>"))
            .finish_non_exhaustive()
    }
}

impl Secrets {
    pub fn from_env(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::from_lookup(config, |name| std::env::var(name).ok())
    }

    /// Resolve secrets through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(config: &EngineConfig, lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let token_secret = get(TOKEN_SECRET_ENV)
            .ok_or_else(|| EngineError::Config(format!("{TOKEN_SECRET_ENV} is not set")))?;
        let data_key = get(DATA_KEY_ENV);
        if config.data.encrypted && data_key.is_none() {
            return Err(EngineError::Config(format!(
                "{DATA_KEY_ENV} is required for encrypted datasets"
            )));
        }
        Ok(Self {
            token_secret,
            data_key,
            weather_api_key: get(WEATHER_API_KEY_ENV),
        })
    }
}
