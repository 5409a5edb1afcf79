//! Baseline and live concentration maps
//!
//! The store itself is plain data; the [`crate::engine::Engine`] wraps it in an
//! `RwLock`. Refresh paths build complete replacement maps outside the lock
//! and swap them in with [`ConcentrationStore::replace_live`] /
//! [`ConcentrationStore::replace_baseline`], so readers never observe a
//! half-applied refresh.

use crate::estimator::{round2, AMBIENT_PPM};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Lowest concentration the store will hold (ppm)
pub const CONCENTRATION_MIN: f64 = 300.0;

/// Highest concentration the store will hold (ppm)
pub const CONCENTRATION_MAX: f64 = 5000.0;

/// Clamp a concentration into the store bounds and round to 2 decimals.
///
/// Non-finite values become the ambient default.
pub fn sanitize(value: f64) -> f64 {
    if !value.is_finite() {
        return AMBIENT_PPM;
    }
    round2(value.clamp(CONCENTRATION_MIN, CONCENTRATION_MAX))
}

/// Which store a request reads from and writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTarget {
    /// Baseline, falling back to live
    Baseline,
    /// Live, falling back to baseline
    Live,
    /// Baseline then live
    #[default]
    Auto,
}

impl StoreTarget {
    /// Parse a collaborator-supplied selector; unknown strings mean `Auto`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" => StoreTarget::Baseline,
            "live" => StoreTarget::Live,
            _ => StoreTarget::Auto,
        }
    }
}

/// The store a value was actually resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedStore {
    Baseline,
    Live,
}

/// Per-station live observation: value plus the feed's timestamp
pub type LiveMaps = (FxHashMap<String, f64>, FxHashMap<String, String>);

#[derive(Debug, Clone, Default)]
pub struct ConcentrationStore {
    baseline: FxHashMap<String, f64>,
    live: FxHashMap<String, f64>,
    live_ts: FxHashMap<String, String>,
    /// (month, day) the baseline was built from
    baseline_date: Option<(u32, u32)>,
}

impl ConcentrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self, station: &str) -> Option<f64> {
        self.baseline.get(station).copied()
    }

    pub fn live(&self, station: &str) -> Option<f64> {
        self.live.get(station).copied()
    }

    pub fn live_ts(&self, station: &str) -> Option<&str> {
        self.live_ts.get(station).map(String::as_str)
    }

    pub fn baseline_len(&self) -> usize {
        self.baseline.len()
    }

    pub fn live_len(&self) -> usize {
        self.live.len()
    }

    pub fn baseline_date(&self) -> Option<(u32, u32)> {
        self.baseline_date
    }

    /// Current value for a station: live first, then baseline.
    pub fn current(&self, station: &str) -> Option<f64> {
        self.live(station).or_else(|| self.baseline(station))
    }

    /// Resolve a station's value following the target's preference order.
    pub fn resolve(&self, station: &str, target: StoreTarget) -> Option<(ResolvedStore, f64)> {
        let baseline = || self.baseline(station).map(|v| (ResolvedStore::Baseline, v));
        let live = || self.live(station).map(|v| (ResolvedStore::Live, v));
        match target {
            StoreTarget::Baseline | StoreTarget::Auto => baseline().or_else(live),
            StoreTarget::Live => live().or_else(baseline),
        }
    }

    /// Overwrite a single station's value in one store. The value is sanitized.
    pub fn set(&mut self, store: ResolvedStore, station: &str, value: f64) -> f64 {
        let value = sanitize(value);
        let map = match store {
            ResolvedStore::Baseline => &mut self.baseline,
            ResolvedStore::Live => &mut self.live,
        };
        map.insert(station.to_string(), value);
        value
    }

    /// Swap in a complete live map (and its timestamps). Values are sanitized.
    pub fn replace_live(&mut self, (mut live, ts): LiveMaps) {
        for v in live.values_mut() {
            *v = sanitize(*v);
        }
        self.live = live;
        self.live_ts = ts;
    }

    /// Swap in a complete baseline map. Values are sanitized.
    pub fn replace_baseline(&mut self, mut baseline: FxHashMap<String, f64>, date: (u32, u32)) {
        for v in baseline.values_mut() {
            *v = sanitize(*v);
        }
        self.baseline = baseline;
        self.baseline_date = Some(date);
    }

    /// Iterate every stored value (baseline then live).
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.baseline.values().chain(self.live.values()).copied()
    }
}
