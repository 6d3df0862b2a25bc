//! Turns raw trip and driver input into the ordered feature vectors the
//! fare regressor and hotspot classifier were trained on.
//!
//! Everything here is pure: no I/O, no state, same input gives the same output.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};

use crate::error::{CopilotError, Result};
use crate::types::{GeoPoint, HotspotRequest, TripRequest};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_TO_MILES: f64 = 0.621371;
/// Assumed average city speed. The fare model was trained against this exact value.
const AVG_SPEED_MPH: f64 = 15.0;

const RATE_CODE_ID: u8 = 1;
const PAYMENT_TYPE: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFeatures {
    pub hour: u32,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: u32,
    pub is_weekend: u8,
    pub is_night: u8,
}

pub fn derive_time_features(ts: NaiveDateTime) -> TimeFeatures {
    let hour = ts.hour();
    let day_of_week = ts.weekday().num_days_from_monday();
    TimeFeatures {
        hour,
        day_of_week,
        is_weekend: weekend_flag(day_of_week),
        is_night: u8::from(hour <= 6 || hour >= 22),
    }
}

fn weekend_flag(day_of_week: u32) -> u8 {
    u8::from(day_of_week >= Weekday::Sat.num_days_from_monday())
}

/// Great-circle distance in miles.
pub fn haversine_distance_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.latitude.to_radians(), a.longitude.to_radians());
    let (lat2, lon2) = (b.latitude.to_radians(), b.longitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let km = 2.0 * EARTH_RADIUS_KM * h.sqrt().asin();
    km * KM_TO_MILES
}

pub fn estimate_duration_minutes(distance_miles: f64) -> f64 {
    if distance_miles > 0.0 {
        (distance_miles / AVG_SPEED_MPH) * 60.0
    } else {
        0.0
    }
}

/// `ln(1 + x)`
pub fn log_transform(x: f64) -> f64 {
    x.ln_1p()
}

/// Fare model input. Field order is the column order the regressor expects.
#[derive(Debug, Clone, PartialEq)]
pub struct FareFeatures {
    pub passenger_count: u32,
    pub pickup_longitude: f64,
    pub pickup_latitude: f64,
    pub dropoff_longitude: f64,
    pub dropoff_latitude: f64,
    pub rate_code_id: u8,
    pub payment_type: u8,
    pub pickup_hour: u32,
    pub pickup_day_of_week: u32,
    pub is_weekend: u8,
    pub is_night: u8,
    pub trip_distance_log: f64,
    pub trip_duration_log: f64,
}

impl FareFeatures {
    pub const COLUMNS: [&'static str; 13] = [
        "passenger_count",
        "pickup_longitude",
        "pickup_latitude",
        "dropoff_longitude",
        "dropoff_latitude",
        "RatecodeID",
        "payment_type",
        "pickup_hour",
        "pickup_day_of_week",
        "is_weekend",
        "is_night",
        "trip_distance_log",
        "trip_duration_log",
    ];

    pub fn values(&self) -> [f64; 13] {
        [
            f64::from(self.passenger_count),
            self.pickup_longitude,
            self.pickup_latitude,
            self.dropoff_longitude,
            self.dropoff_latitude,
            f64::from(self.rate_code_id),
            f64::from(self.payment_type),
            f64::from(self.pickup_hour),
            f64::from(self.pickup_day_of_week),
            f64::from(self.is_weekend),
            f64::from(self.is_night),
            self.trip_distance_log,
            self.trip_duration_log,
        ]
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values().iter().map(|v| *v as f32).collect()
    }

    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        named_values(&Self::COLUMNS, &self.values())
    }
}

/// Hotspot classifier input. No `is_night` here; the classifier never saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotFeatures {
    pub pickup_longitude: f64,
    pub pickup_latitude: f64,
    pub pickup_hour: u32,
    pub pickup_day_of_week: u32,
    pub is_weekend: u8,
}

impl HotspotFeatures {
    pub const COLUMNS: [&'static str; 5] = [
        "pickup_longitude",
        "pickup_latitude",
        "pickup_hour",
        "pickup_day_of_week",
        "is_weekend",
    ];

    pub fn values(&self) -> [f64; 5] {
        [
            self.pickup_longitude,
            self.pickup_latitude,
            f64::from(self.pickup_hour),
            f64::from(self.pickup_day_of_week),
            f64::from(self.is_weekend),
        ]
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values().iter().map(|v| *v as f32).collect()
    }

    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        named_values(&Self::COLUMNS, &self.values())
    }
}

fn named_values(columns: &[&str], values: &[f64]) -> serde_json::Map<String, serde_json::Value> {
    columns
        .iter()
        .zip(values)
        .map(|(k, v)| ((*k).to_string(), serde_json::json!(v)))
        .collect()
}

fn ensure_finite(columns: &[&'static str], values: &[f64]) -> Result<()> {
    for (&feature, &value) in columns.iter().zip(values) {
        if !value.is_finite() {
            return Err(CopilotError::FeatureDerivation { feature, value });
        }
    }
    Ok(())
}

pub fn build_fare_features(req: &TripRequest) -> Result<FareFeatures> {
    req.validate()?;

    let time = derive_time_features(req.pickup_datetime);
    let distance = haversine_distance_miles(req.pickup, req.dropoff);
    let duration = estimate_duration_minutes(distance);

    let features = FareFeatures {
        passenger_count: req.passenger_count,
        pickup_longitude: req.pickup.longitude,
        pickup_latitude: req.pickup.latitude,
        dropoff_longitude: req.dropoff.longitude,
        dropoff_latitude: req.dropoff.latitude,
        rate_code_id: RATE_CODE_ID,
        payment_type: PAYMENT_TYPE,
        pickup_hour: time.hour,
        pickup_day_of_week: time.day_of_week,
        is_weekend: time.is_weekend,
        is_night: time.is_night,
        trip_distance_log: log_transform(distance),
        trip_duration_log: log_transform(duration),
    };
    ensure_finite(&FareFeatures::COLUMNS, &features.values())?;
    Ok(features)
}

pub fn build_hotspot_features(req: &HotspotRequest) -> Result<HotspotFeatures> {
    req.validate()?;

    let day_of_week = req.date.weekday().num_days_from_monday();
    let features = HotspotFeatures {
        pickup_longitude: req.location.longitude,
        pickup_latitude: req.location.latitude,
        pickup_hour: req.hour,
        pickup_day_of_week: day_of_week,
        is_weekend: weekend_flag(day_of_week),
    };
    ensure_finite(&HotspotFeatures::COLUMNS, &features.values())?;
    Ok(features)
}
