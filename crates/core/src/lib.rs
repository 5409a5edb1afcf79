//! Environmental Telemetry Fusion Core Library
//!
//! Fuses unreliable air-quality feeds into a stable per-station dataset and
//! derives planning products from it.
//!
//! ## Pipeline
//!
//! - Primary and fallback feeds of arbitrary JSON shape are normalized,
//!   estimated and matched to the nearest registry station
//! - Baseline (historical) and live (fused) concentrations share one store
//! - A Gaussian plume grid spreads station concentrations over a city
//! - An intervention model applies a bounded, weather-modulated reduction
//! - Station snapshots carry HMAC tokens so echoed values can be trusted

// Core types and utilities
pub mod core_types;
pub mod error;
pub mod geo;

// Data
pub mod datasets;
pub mod profiles;
pub mod registry;
pub mod store;

// Upstreams
pub mod estimator;
pub mod feeds;
pub mod weather;

// Models
pub mod dispersion;
pub mod integrity;
pub mod intervention;

// Runtime
pub mod config;
pub mod engine;
pub mod scheduler;

// Re-export core types
pub use core_types::{EnvironmentalProfile, Station, StationSnapshot, StationView};
pub use core_types::{Degrees, Meters, MetersPerSecond};

// Re-export runtime types
pub use config::{EngineConfig, Secrets};
pub use engine::{Engine, InterventionOutcome, InterventionRequest, RefreshReport, Upstreams};
pub use error::{EngineError, ErrorCode};
pub use scheduler::{Context, RefreshEvent, RefreshScheduler};

// Re-export model types
pub use dispersion::{DispersionGrid, GridCell, StabilityClass, Wind};
pub use intervention::{intervention_effect, InterventionRecord, StagnationLevel, WeatherScenario};
pub use store::StoreTarget;
pub use weather::{WeatherReport, WeatherSnapshot};
