//! Weather observations and labeled training samples.
//!
//! Features are always addressed by name. The column order used by the
//! regressors is fixed by [`FEATURE_NAMES`] and never inferred from input order.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Number of model input features
pub const FEATURE_COUNT: usize = 10;

/// Canonical feature names, in model column order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "temperature",
    "humidity",
    "pressure",
    "wind_speed",
    "cloud_cover",
    "uv_index",
    "hour",
    "day_of_year",
    "latitude",
    "longitude",
];

/// Name of the regression target
pub const TARGET_NAME: &str = "solar_irradiance";

pub fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Errors raised while turning named input into a [`WeatherRecord`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("Missing features: {}", .missing.join(", "))]
    Missing { missing: Vec<String> },

    #[error("Unknown features: {}", .unknown.join(", "))]
    Unknown { unknown: Vec<String> },

    #[error("Invalid value for feature '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("Expected {expected} feature values, got {actual}")]
    Count { expected: usize, actual: usize },
}

/// One weather observation at a location and time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Air temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Air pressure (hPa)
    pub pressure: f64,
    /// Wind speed (m/s)
    pub wind_speed: f64,
    /// Cloud cover (0-100%)
    pub cloud_cover: f64,
    /// UV index (0-11)
    pub uv_index: f64,
    /// Hour of day (0-23)
    pub hour: f64,
    /// Day of year (1-365)
    pub day_of_year: f64,
    /// Latitude (degrees, positive = North)
    pub latitude: f64,
    /// Longitude (degrees, positive = East)
    pub longitude: f64,
}

impl WeatherRecord {
    /// Feature values in [`FEATURE_NAMES`] order
    pub fn to_features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.temperature,
            self.humidity,
            self.pressure,
            self.wind_speed,
            self.cloud_cover,
            self.uv_index,
            self.hour,
            self.day_of_year,
            self.latitude,
            self.longitude,
        ]
    }

    /// Inverse of [`to_features`](Self::to_features)
    pub fn from_features(values: &[f64]) -> Result<Self, FeatureError> {
        if values.len() != FEATURE_COUNT {
            return Err(FeatureError::Count {
                expected: FEATURE_COUNT,
                actual: values.len(),
            });
        }
        Ok(Self {
            temperature: values[0],
            humidity: values[1],
            pressure: values[2],
            wind_speed: values[3],
            cloud_cover: values[4],
            uv_index: values[5],
            hour: values[6],
            day_of_year: values[7],
            latitude: values[8],
            longitude: values[9],
        })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.to_features()[idx])
    }

    /// Build a record from named numeric values.
    ///
    /// Every name in [`FEATURE_NAMES`] must be present; names outside it are
    /// rejected. Missing names are reported before unknown ones.
    pub fn from_named(values: &HashMap<String, f64>) -> Result<Self, FeatureError> {
        check_names(values.keys().map(String::as_str))?;

        let mut ordered = [0.0; FEATURE_COUNT];
        for (slot, name) in ordered.iter_mut().zip(FEATURE_NAMES.iter()) {
            let value = values[*name];
            check_finite(name, value)?;
            *slot = value;
        }
        Self::from_features(&ordered)
    }

    /// Build a record from a JSON object such as a request body
    pub fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> Result<Self, FeatureError> {
        check_names(object.keys().map(String::as_str))?;

        let mut ordered = [0.0; FEATURE_COUNT];
        for (slot, name) in ordered.iter_mut().zip(FEATURE_NAMES.iter()) {
            let value = object[*name].as_f64().ok_or_else(|| FeatureError::Invalid {
                name: name.to_string(),
                reason: format!("expected a number, got {}", object[*name]),
            })?;
            check_finite(name, value)?;
            *slot = value;
        }
        Self::from_features(&ordered)
    }

    pub fn to_json(&self) -> serde_json::Map<String, serde_json::Value> {
        FEATURE_NAMES
            .iter()
            .zip(self.to_features())
            .map(|(name, value)| (name.to_string(), serde_json::Value::from(value)))
            .collect()
    }
}

fn check_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), FeatureError> {
    let present: BTreeSet<&str> = names.collect();

    let missing: Vec<String> = FEATURE_NAMES
        .iter()
        .filter(|name| !present.contains(*name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(FeatureError::Missing { missing });
    }

    let unknown: Vec<String> = present
        .iter()
        .filter(|name| !FEATURE_NAMES.contains(*name))
        .map(|name| name.to_string())
        .collect();
    if !unknown.is_empty() {
        return Err(FeatureError::Unknown { unknown });
    }

    Ok(())
}

fn check_finite(name: &str, value: f64) -> Result<(), FeatureError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FeatureError::Invalid {
            name: name.to_string(),
            reason: format!("value must be finite, got {value}"),
        })
    }
}

/// A weather record labeled with the measured irradiance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    #[serde(flatten)]
    pub record: WeatherRecord,
    /// Irradiance target (W/m², >= 0)
    pub solar_irradiance: f64,
    /// Set for time-series samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
}

impl TrainingSample {
    pub fn new(record: WeatherRecord, solar_irradiance: f64) -> Self {
        Self {
            record,
            solar_irradiance,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
