//! Environmental profile resolution
//!
//! A station's profile comes from the reference table (keyed by station id)
//! when it has a row there. Otherwise a synthetic profile is generated once
//! per process from a seeded generator and cached; concurrent first lookups
//! of the same station all observe the single generated value.

use crate::core_types::profile::{EnvironmentalProfile, ProfileSource, LULC_FACTORS};
use crate::estimator::round3;
use fnv::FnvHasher;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Range of synthetic NDVI values (half-open)
pub const SYNTHETIC_NDVI: (f64, f64) = (0.15, 0.45);

/// Range of synthetic albedo values (half-open)
pub const SYNTHETIC_ALBEDO: (f64, f64) = (0.12, 0.20);

/// Stable 64-bit FNV-1a hash of a station name.
pub fn name_hash(name: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    hasher.finish()
}

/// Generate the synthetic profile for `name` under `session_seed`.
pub fn synthesize(name: &str, session_seed: u64) -> EnvironmentalProfile {
    let mut rng = ChaCha8Rng::seed_from_u64(name_hash(name) ^ session_seed);
    let ndvi = round3(rng.random_range(SYNTHETIC_NDVI.0..SYNTHETIC_NDVI.1));
    let albedo = round3(rng.random_range(SYNTHETIC_ALBEDO.0..SYNTHETIC_ALBEDO.1));
    let (lulc, _) = LULC_FACTORS[rng.random_range(0..LULC_FACTORS.len())];
    EnvironmentalProfile::new(ndvi, albedo, lulc, ProfileSource::Synthetic)
}

type SyntheticCell = Arc<OnceLock<EnvironmentalProfile>>;

pub struct ProfileResolver {
    /// Reference profiles by station id
    reference: FxHashMap<String, EnvironmentalProfile>,
    /// Station name to id, from the id mapping table
    id_by_name: FxHashMap<String, String>,
    session_seed: u64,
    synthetic: Mutex<FxHashMap<String, SyntheticCell>>,
    generated: AtomicUsize,
}

impl ProfileResolver {
    /// `id_to_name` is the registry's id mapping; the first id mapped to a
    /// name is the one used for reference lookups.
    pub fn new(
        reference: FxHashMap<String, EnvironmentalProfile>,
        id_to_name: &FxHashMap<String, String>,
        session_seed: u64,
    ) -> Self {
        let mut pairs: Vec<(&String, &String)> = id_to_name.iter().collect();
        pairs.sort();
        let mut id_by_name = FxHashMap::default();
        for (id, name) in pairs {
            id_by_name.entry(name.clone()).or_insert_with(|| id.clone());
        }
        Self {
            reference,
            id_by_name,
            session_seed,
            synthetic: Mutex::new(FxHashMap::default()),
            generated: AtomicUsize::new(0),
        }
    }

    pub fn reference_len(&self) -> usize {
        self.reference.len()
    }

    /// Number of synthetic profiles generated so far
    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::Relaxed)
    }

    /// Profile for a station, by explicit id first, then by the id mapped to
    /// its name, then synthetic. `None` only for a blank name with no
    /// reference row.
    pub fn resolve(&self, id: Option<&str>, name: &str) -> Option<EnvironmentalProfile> {
        let mapped = self.id_by_name.get(name).map(String::as_str);
        for key in [id, mapped].into_iter().flatten() {
            if let Some(profile) = self.reference.get(key) {
                return Some(profile.clone());
            }
        }
        if name.trim().is_empty() {
            return None;
        }
        Some(self.synthetic(name))
    }

    fn synthetic(&self, name: &str) -> EnvironmentalProfile {
        let cell = {
            let mut cells = self
                .synthetic
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Arc::clone(cells.entry(name.to_string()).or_default())
        };
        // Generation runs outside the map lock; OnceLock admits one initializer
        cell.get_or_init(|| {
            self.generated.fetch_add(1, Ordering::Relaxed);
            let profile = synthesize(name, self.session_seed);
            debug!(
                station = name,
                ndvi = profile.ndvi,
                albedo = profile.albedo,
                lulc = %profile.lulc,
                "synthesized environmental profile"
            );
            profile
        })
        .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::profile::lulc_factor;
    use std::thread;

    fn resolver(seed: u64) -> ProfileResolver {
        let mut reference = FxHashMap::default();
        reference.insert(
            "DL001".to_string(),
            EnvironmentalProfile::new(0.31, 0.14, "Urban", ProfileSource::Reference),
        );
        let mut ids = FxHashMap::default();
        ids.insert("DL001".to_string(), "Anand Vihar".to_string());
        ProfileResolver::new(reference, &ids, seed)
    }

    #[test]
    fn test_fnv1a_vectors() {
        assert_eq!(name_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(name_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_reference_by_id_or_name() {
        let r = resolver(7);
        let by_name = r.resolve(None, "Anand Vihar").unwrap();
        assert_eq!(by_name.source, ProfileSource::Reference);
        assert_eq!(by_name.ndvi, 0.31);
        let by_id = r.resolve(Some("DL001"), "renamed").unwrap();
        assert_eq!(by_id, by_name);
        assert_eq!(r.generated(), 0);
    }

    #[test]
    fn test_synthetic_ranges_and_stability() {
        let r = resolver(42);
        for name in ["Hebbal", "Silk Board", "Bandra", "Worli", "Sector 62"] {
            let p = r.resolve(None, name).unwrap();
            assert_eq!(p.source, ProfileSource::Synthetic);
            assert!((SYNTHETIC_NDVI.0..=SYNTHETIC_NDVI.1).contains(&p.ndvi));
            assert!((SYNTHETIC_ALBEDO.0..=SYNTHETIC_ALBEDO.1).contains(&p.albedo));
            assert!(LULC_FACTORS.iter().any(|(l, _)| *l == p.lulc));
            assert_ne!(lulc_factor(&p.lulc), 0.0);
            assert_eq!(r.resolve(None, name).unwrap(), p);
        }
        assert_eq!(r.generated(), 5);
    }

    #[test]
    fn test_distinct_names_differ() {
        let a = synthesize("Hebbal", 1);
        let b = synthesize("Silk Board", 1);
        assert_ne!((a.ndvi, a.albedo), (b.ndvi, b.albedo));
        assert_eq!(a, synthesize("Hebbal", 1));
        assert_ne!(a, synthesize("Hebbal", 2));
    }

    #[test]
    fn test_blank_name_unresolved() {
        assert!(resolver(0).resolve(None, "  ").is_none());
    }

    #[test]
    fn test_concurrent_first_access_single_value() {
        let r = Arc::new(resolver(99));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let r = Arc::clone(&r);
                thread::spawn(move || r.resolve(None, "Peenya").unwrap())
            })
            .collect();
        let results: Vec<EnvironmentalProfile> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(r.generated(), 1);
    }
}
