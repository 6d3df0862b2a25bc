use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CopilotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Range-checks both coordinates. `name` prefixes the field in the error,
    /// e.g. `pickup` -> `pickup.latitude`.
    pub fn validate(&self, name: &str) -> Result<()> {
        check_range(name, "latitude", self.latitude, 90.0)?;
        check_range(name, "longitude", self.longitude, 180.0)
    }
}

fn check_range(name: &str, axis: &str, value: f64, limit: f64) -> Result<()> {
    if !value.is_finite() || value < -limit || value > limit {
        return Err(CopilotError::invalid(
            format!("{name}.{axis}"),
            format!("{value} is outside [-{limit}, {limit}]"),
        ));
    }
    Ok(())
}

// Passenger mode input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub passenger_count: u32,
    #[serde(deserialize_with = "deserialize_pickup_datetime")]
    pub pickup_datetime: NaiveDateTime,
}

// Date and time pickers give minute precision; seconds are optional.
const PICKUP_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn deserialize_pickup_datetime<'de, D>(deserializer: D) -> std::result::Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    PICKUP_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&raw, fmt).ok())
        .ok_or_else(|| {
            serde::de::Error::custom(format!(
                "{raw:?} is not a timestamp like 2024-06-15T18:30 or 2024-06-15T18:30:00"
            ))
        })
}

impl TripRequest {
    pub fn validate(&self) -> Result<()> {
        self.pickup.validate("pickup")?;
        self.dropoff.validate("dropoff")?;
        if !(1..=6).contains(&self.passenger_count) {
            return Err(CopilotError::invalid(
                "passenger_count",
                format!("{} is outside [1, 6]", self.passenger_count),
            ));
        }
        Ok(())
    }
}

// Driver mode input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotRequest {
    pub location: GeoPoint,
    pub date: NaiveDate,
    pub hour: u32,
}

impl HotspotRequest {
    pub fn validate(&self) -> Result<()> {
        self.location.validate("location")?;
        if self.hour > 23 {
            return Err(CopilotError::invalid(
                "hour",
                format!("{} is outside [0, 23]", self.hour),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct FareOut {
    pub fare: f64,
    pub trip_distance_miles: f64,
    pub estimated_duration_min: f64,
    pub features: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct HotspotOut {
    pub prediction: u8,
    pub label: &'static str,
    pub hotspot_probability: f64,
    pub features: serde_json::Map<String, serde_json::Value>,
}
