/// Integration tests for feature derivation and model loading
///
/// Run with: cargo test --test integration_tests -- --nocapture

use chrono::NaiveDate;
use fare_copilot::config::ModelPaths;
use fare_copilot::features::{build_fare_features, build_hotspot_features, FareFeatures};
use fare_copilot::model::ModelRegistry;
use fare_copilot::types::{GeoPoint, HotspotRequest, TripRequest};
use fare_copilot::CopilotError;
use std::fs;

fn saturday_evening_trip() -> TripRequest {
    TripRequest {
        pickup: GeoPoint::new(40.768, -73.982),
        dropoff: GeoPoint::new(40.730, -73.980),
        passenger_count: 2,
        pickup_datetime: NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(18, 30, 0)
            .unwrap(),
    }
}

#[test]
fn test_end_to_end_fare_features() {
    println!("\n=== Test: End-to-end Fare Features ===");
    let f = build_fare_features(&saturday_evening_trip()).expect("valid trip");

    assert_eq!(f.passenger_count, 2);
    assert_eq!(f.pickup_hour, 18);
    assert_eq!(f.pickup_day_of_week, 5, "2024-06-15 is a Saturday");
    assert_eq!(f.is_weekend, 1);
    assert_eq!(f.is_night, 0);
    assert_eq!(f.rate_code_id, 1);
    assert_eq!(f.payment_type, 1);

    let expected = 2.63_f64.ln_1p();
    assert!(
        (f.trip_distance_log - expected).abs() < 0.015,
        "trip_distance_log {} not near {}",
        f.trip_distance_log,
        expected
    );
    // duration is distance / 15 mph in minutes
    let distance = f.trip_distance_log.exp_m1();
    assert!((f.trip_duration_log - (distance * 4.0).ln_1p()).abs() < 1e-9);

    println!("✓ features: {:?}", f.to_json());
}

#[test]
fn test_fare_vector_order_independent_of_input() {
    println!("\n=== Test: Fare Column Order ===");
    let mut trip = saturday_evening_trip();
    for (count, hour) in [(1, 0), (4, 7), (6, 23)] {
        trip.passenger_count = count;
        trip.pickup_datetime = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(hour, 5, 0)
            .unwrap();
        let f = build_fare_features(&trip).unwrap();
        let keys: Vec<String> = f.to_json().keys().cloned().collect();
        assert_eq!(keys, FareFeatures::COLUMNS.map(String::from).to_vec());
        assert_eq!(f.to_vec().len(), 13);
        assert_eq!(f.to_vec()[0], count as f32);
        assert_eq!(f.to_vec()[7], hour as f32);
    }
    println!("✓ column order stable");
}

#[test]
fn test_hotspot_features_from_request() {
    println!("\n=== Test: Hotspot Features ===");
    let req = HotspotRequest {
        location: GeoPoint::new(40.7580, -73.9855),
        date: NaiveDate::from_ymd_opt(2024, 6, 12).unwrap(),
        hour: 19,
    };
    let f = build_hotspot_features(&req).unwrap();
    assert_eq!(f.pickup_hour, 19);
    assert_eq!(f.pickup_day_of_week, 2);
    assert_eq!(f.is_weekend, 0);
    assert_eq!(f.to_vec().len(), 5);
    println!("✓ hotspot features: {:?}", f.values());
}

#[test]
fn test_one_missing_model_is_fatal() {
    println!("\n=== Test: Missing Model Artifact ===");
    let dir = tempfile::tempdir().unwrap();
    let paths = ModelPaths {
        fare_model: dir.path().join("taxi_fare_predictor.pt"),
        fare_meta: dir.path().join("taxi_fare_predictor.meta.json"),
        hotspot_model: dir.path().join("driver_hotspot_classifier.pt"),
        hotspot_meta: dir.path().join("driver_hotspot_classifier.meta.json"),
    };
    fs::write(&paths.fare_model, b"not really torchscript").unwrap();
    fs::write(&paths.fare_meta, b"{}").unwrap();
    fs::write(&paths.hotspot_meta, b"{}").unwrap();

    match ModelRegistry::load(&paths) {
        Err(CopilotError::ModelLoad { path, reason }) => {
            assert_eq!(path, paths.hotspot_model);
            assert_eq!(reason, "file not found");
            println!("✓ refused to start: {}", path.display());
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("registry must not load with a missing model"),
    }
}
