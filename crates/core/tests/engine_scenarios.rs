//! Intervention, baseline and integrity behavior through the engine API.

mod common;

use airtwin_core::feeds::{CannedFetcher, FetchError};
use airtwin_core::store::{ResolvedStore, CONCENTRATION_MAX, CONCENTRATION_MIN};
use airtwin_core::{
    ErrorCode, InterventionRequest, MetersPerSecond, StagnationLevel, StoreTarget,
    WeatherScenario,
};
use approx::assert_relative_eq;
use common::*;
use std::sync::Arc;
use std::thread;

#[test]
fn test_urban_greening_on_baseline() {
    let h = offline();
    assert_eq!(h.engine.switch_baseline(11, 2).unwrap(), 3);

    let mut request = InterventionRequest::new("Anand Vihar");
    request.efficiency = Some(50.0);
    let outcome = h.engine.apply_intervention(&request).unwrap();

    assert_eq!(outcome.applied_to, ResolvedStore::Baseline);
    assert_eq!(outcome.before, 450.0);
    assert_relative_eq!(outcome.ratio, 0.03375, epsilon = 1e-12);
    assert_eq!(outcome.after, 434.81);
    assert_eq!(outcome.lulc, "Urban");
    assert_eq!(outcome.lulc_factor, 2.0);

    h.engine.with_store(|store| {
        assert_eq!(store.baseline("Anand Vihar"), Some(434.81));
        assert_eq!(store.live("Anand Vihar"), None);
    });

    let log = h.engine.interventions();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].method, "urban_greening");
    assert_eq!(log[0].delta(), 15.19);
}

#[test]
fn test_repeated_interventions_compound() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();
    let request = InterventionRequest::new("Anand Vihar");

    let first = h.engine.apply_intervention(&request).unwrap();
    let second = h.engine.apply_intervention(&request).unwrap();
    assert_eq!(second.before, first.after);
    assert!(second.after < first.after);
    assert_eq!(h.engine.interventions().len(), 2);
}

#[test]
fn test_returned_token_verifies_new_snapshot() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();
    let outcome = h
        .engine
        .apply_intervention(&InterventionRequest::new("Anand Vihar"))
        .unwrap();

    let view = h.engine.station("Anand Vihar").unwrap();
    assert_eq!(view.baseline, Some(outcome.after));
    assert_eq!(view.token.as_deref(), Some(outcome.token.as_str()));
}

#[test]
fn test_live_target_falls_back_to_baseline() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();

    let mut request = InterventionRequest::new("Bandra");
    request.target = StoreTarget::Live;
    let outcome = h.engine.apply_intervention(&request).unwrap();
    assert_eq!(outcome.applied_to, ResolvedStore::Baseline);
    assert_eq!(outcome.before, 600.0);
}

#[test]
fn test_live_target_uses_live_store() {
    let h = harness_with(
        CannedFetcher::always(primary_payload(&[(ANAND_VIHAR.0, ANAND_VIHAR.1, 200.0)])),
        CannedFetcher::failing(FetchError::Timeout),
        CannedFetcher::failing(FetchError::Timeout),
    );
    h.engine.switch_baseline(11, 2).unwrap();
    assert!(h.engine.refresh_now().updated());

    let mut request = InterventionRequest::new("Anand Vihar");
    request.target = StoreTarget::Live;
    let outcome = h.engine.apply_intervention(&request).unwrap();
    assert_eq!(outcome.applied_to, ResolvedStore::Live);
    assert_eq!(outcome.before, 418.0);
    h.engine.with_store(|store| {
        assert_eq!(store.baseline("Anand Vihar"), Some(450.0));
        assert_eq!(store.live("Anand Vihar"), Some(outcome.after));
    });
}

#[test]
fn test_missing_station_and_values() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();

    let unknown = h
        .engine
        .apply_intervention(&InterventionRequest::new("Atlantis"))
        .unwrap_err();
    assert_eq!(unknown.code(), ErrorCode::NotFound);

    // Registered but neither baseline nor live
    let empty = h
        .engine
        .apply_intervention(&InterventionRequest::new("Hebbal"))
        .unwrap_err();
    assert_eq!(empty.code(), ErrorCode::NotFound);

    let blank = h
        .engine
        .apply_intervention(&InterventionRequest::new("  "))
        .unwrap_err();
    assert_eq!(blank.code(), ErrorCode::InvalidParameter);
    assert!(h.engine.interventions().is_empty());
}

#[test]
fn test_snapshot_round_trip_is_accepted() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();
    let view = h.engine.station("Anand Vihar").unwrap();

    let mut request = InterventionRequest::new("Anand Vihar");
    request.snapshot = view.snapshot();
    request.token = view.token.clone();
    assert!(h.engine.apply_intervention(&request).is_ok());
}

#[test]
fn test_tampered_snapshot_is_rejected() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();
    let view = h.engine.station("Anand Vihar").unwrap();
    let mut snapshot = view.snapshot().unwrap();
    snapshot.concentration += 0.01;

    let mut request = InterventionRequest::new("Anand Vihar");
    request.snapshot = Some(snapshot);
    request.token = view.token.clone();
    let err = h.engine.apply_intervention(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::IntegrityMismatch);

    h.engine.with_store(|store| assert_eq!(store.baseline("Anand Vihar"), Some(450.0)));
    assert!(h.engine.interventions().is_empty());
}

#[test]
fn test_snapshot_for_other_station_is_rejected() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();
    let ito = h.engine.station("ITO").unwrap();

    let mut request = InterventionRequest::new("Anand Vihar");
    request.snapshot = ito.snapshot();
    request.token = ito.token.clone();
    let err = h.engine.apply_intervention(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::IntegrityMismatch);
}

#[test]
fn test_token_without_snapshot_is_invalid() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();
    let mut request = InterventionRequest::new("Anand Vihar");
    request.token = Some("00".into());
    let err = h.engine.apply_intervention(&request).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidParameter);
}

#[test]
fn test_station_id_must_belong_to_station() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();

    let mut borrowed = InterventionRequest::new("ITO");
    borrowed.station_id = Some("DL001".into());
    let err = h.engine.apply_intervention(&borrowed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidParameter);
    h.engine.with_store(|store| assert_eq!(store.baseline("ITO"), Some(400.0)));
    assert!(h.engine.interventions().is_empty());

    let mut own = InterventionRequest::new("Anand Vihar");
    own.station_id = Some("DL001".into());
    let outcome = h.engine.apply_intervention(&own).unwrap();
    assert_eq!(outcome.lulc, "Urban");
}

#[test]
fn test_explicit_weather_scenario() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();

    let mut request = InterventionRequest::new("Anand Vihar");
    request.weather = Some(WeatherScenario {
        stagnation: Some(StagnationLevel::High),
        wind_speed: Some(MetersPerSecond::new(1.0)),
        mixing_height_m: Some(400.0),
    });
    let outcome = h.engine.apply_intervention(&request).unwrap();
    assert_relative_eq!(outcome.ratio, 0.03375 * 1.2 * 1.05 * 1.05, epsilon = 1e-12);
    assert!(outcome.ratio <= 0.5);
    assert_eq!(h.weather.calls(), 0);
}

#[test]
fn test_live_weather_scenario() {
    let h = harness_with(
        CannedFetcher::failing(FetchError::Timeout),
        CannedFetcher::failing(FetchError::Timeout),
        CannedFetcher::always(calm_weather()),
    );
    h.engine.switch_baseline(11, 2).unwrap();

    let mut request = InterventionRequest::new("Anand Vihar");
    request.use_live_weather = true;
    let outcome = h.engine.apply_intervention(&request).unwrap();

    // Poor dispersion maps to high stagnation, calm wind adds 5%
    assert_relative_eq!(outcome.ratio, 0.03375 * 1.2 * 1.05, epsilon = 1e-12);
    assert_eq!(outcome.weather.unwrap().stagnation, Some(StagnationLevel::High));
    assert_eq!(h.weather.calls(), 1);
}

#[test]
fn test_live_weather_unavailable_applies_without_scenario() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();

    let mut request = InterventionRequest::new("Anand Vihar");
    request.use_live_weather = true;
    let outcome = h.engine.apply_intervention(&request).unwrap();
    assert_relative_eq!(outcome.ratio, 0.03375, epsilon = 1e-12);
    assert!(outcome.weather.is_none());
}

#[test]
fn test_synthetic_profile_is_stable() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();

    let before = h.engine.station("ITO").unwrap();
    let after = h.engine.station("ITO").unwrap();
    assert_eq!(before.ndvi, after.ndvi);
    assert_eq!(before.albedo, after.albedo);
    assert_eq!(before.lulc, after.lulc);
    assert!((0.15..=0.45).contains(&before.ndvi));
    assert!((0.12..=0.20).contains(&before.albedo));
}

#[test]
fn test_switch_baseline() {
    let h = offline();
    assert_eq!(h.engine.switch_baseline(11, 2).unwrap(), 3);
    h.engine.with_store(|store| {
        assert_eq!(store.baseline("ITO"), Some(400.0));
        assert_eq!(store.baseline_date(), Some((11, 2)));
    });

    assert_eq!(h.engine.switch_baseline(1, 1).unwrap(), 1);
    h.engine.with_store(|store| {
        assert_eq!(store.baseline("Anand Vihar"), Some(900.0));
        assert_eq!(store.baseline("ITO"), None);
    });
}

#[test]
fn test_switch_baseline_errors_leave_store_untouched() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();

    let no_rows = h.engine.switch_baseline(3, 15).unwrap_err();
    assert_eq!(no_rows.code(), ErrorCode::NotFound);
    let invalid = h.engine.switch_baseline(2, 30).unwrap_err();
    assert_eq!(invalid.code(), ErrorCode::InvalidParameter);
    assert_eq!(
        h.engine.switch_baseline(13, 1).unwrap_err().code(),
        ErrorCode::InvalidParameter
    );
    // Leap day is addressable even without rows
    assert_eq!(
        h.engine.switch_baseline(2, 29).unwrap_err().code(),
        ErrorCode::NotFound
    );

    h.engine.with_store(|store| {
        assert_eq!(store.baseline_len(), 3);
        assert_eq!(store.baseline_date(), Some((11, 2)));
    });
}

#[test]
fn test_stations_tokens() {
    let h = offline();
    h.engine.switch_baseline(11, 2).unwrap();
    let views = h.engine.stations();
    assert_eq!(views.len(), 4);

    for view in &views {
        match view.snapshot() {
            Some(snapshot) => {
                let token = view.token.as_deref().unwrap();
                assert!(h.engine.signer().verify(&snapshot, token));
            }
            None => assert!(view.token.is_none()),
        }
    }
    let hebbal = views.iter().find(|v| v.name == "Hebbal").unwrap();
    assert!(hebbal.token.is_none());
}

#[test]
fn test_concurrent_interventions_and_refreshes_stay_in_bounds() {
    let h = harness_with(
        CannedFetcher::always(primary_payload(&[
            (ANAND_VIHAR.0, ANAND_VIHAR.1, 1.0e9),
            (ITO.0, ITO.1, 40.0),
        ])),
        CannedFetcher::failing(FetchError::Timeout),
        CannedFetcher::failing(FetchError::Timeout),
    );
    h.engine.switch_baseline(11, 2).unwrap();
    let engine = Arc::new(h.engine);

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..25 {
                    if i % 2 == 0 {
                        engine.refresh_now();
                    } else {
                        let mut request = InterventionRequest::new("Anand Vihar");
                        request.efficiency = Some(50.0);
                        request.target = StoreTarget::Live;
                        engine.apply_intervention(&request).unwrap();
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(engine.interventions().len(), 4 * 25);
    for value in all_values(&engine) {
        assert!((CONCENTRATION_MIN..=CONCENTRATION_MAX).contains(&value), "{value}");
    }
}
