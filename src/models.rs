//! Data models shared by the forecasting pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ForecastError, Result};

// ---

/// The two co-sampled scalar streams. Also used as the target variable key
/// for trained artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
}

impl SensorKind {
    // ---
    /// Both kinds in training order.
    pub const ALL: [SensorKind; 2] = [SensorKind::Temperature, SensorKind::Humidity];

    pub fn as_str(&self) -> &'static str {
        // ---
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
        }
    }

    /// Parse the `sensor_type` strings used by the sensor database.
    pub fn from_sensor_type(value: &str) -> Option<Self> {
        // ---
        match value {
            "temperature" => Some(SensorKind::Temperature),
            "humidity" => Some(SensorKind::Humidity),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row as stored in the sensor database (`svalue` is text there).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RawSensorRow {
    // ---
    pub svalue: String,
    pub recorded_time: DateTime<Utc>,
}

/// One validated sample of a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    // ---
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl RawSensorRow {
    // ---
    /// Parse the stored text value; anything that is not a finite number is
    /// an alignment error for the whole batch.
    pub fn parse(&self) -> Result<RawReading> {
        // ---
        let value: f64 = self.svalue.trim().parse().map_err(|_| {
            ForecastError::Alignment(format!(
                "non-numeric value '{}' at {}",
                self.svalue, self.recorded_time
            ))
        })?;

        if !value.is_finite() {
            return Err(ForecastError::Alignment(format!(
                "non-finite value '{}' at {}",
                self.svalue, self.recorded_time
            )));
        }

        Ok(RawReading {
            value,
            timestamp: self.recorded_time,
        })
    }
}

/// One point of the regular 5-minute grid after merging both streams.
///
/// A column is `None` where no sample and no interpolation could fill it
/// (leading gaps before a stream's first sample).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedRecord {
    // ---
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Online prediction request: the two most recent ticks of each stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    // ---
    pub current_temperature: f64,
    pub previous_temperature: f64,
    pub current_humidity: f64,
    pub previous_humidity: f64,
}

impl PredictionRequest {
    // ---
    const FIELDS: [&'static str; 4] = [
        "current_temperature",
        "previous_temperature",
        "current_humidity",
        "previous_humidity",
    ];

    /// Validate a JSON-shaped request. All four fields are required and must
    /// be finite numbers; no unit conversion happens here.
    pub fn from_value(value: &Value) -> Result<Self> {
        // ---
        let object = value
            .as_object()
            .ok_or_else(|| ForecastError::InvalidInput("request must be a JSON object".into()))?;

        let mut fields = [0.0_f64; 4];
        for (slot, name) in fields.iter_mut().zip(Self::FIELDS) {
            let raw = object
                .get(name)
                .filter(|v| !v.is_null())
                .ok_or_else(|| ForecastError::InvalidInput(format!("missing field '{name}'")))?;

            *slot = raw
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    ForecastError::InvalidInput(format!("field '{name}' is not a number: {raw}"))
                })?;
        }

        Ok(PredictionRequest {
            current_temperature: fields[0],
            previous_temperature: fields[1],
            current_humidity: fields[2],
            previous_humidity: fields[3],
        })
    }
}

/// Temperature half of a [`PredictionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureForecast {
    // ---
    pub current: f64,
    pub predicted: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub exceeds_threshold: bool,
    pub threshold: f64,
}

/// Humidity half of a [`PredictionResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityForecast {
    // ---
    pub current: f64,
    pub predicted: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

/// Response of one prediction request. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    // ---
    pub prediction_time: DateTime<Utc>,
    pub temperature: TemperatureForecast,
    pub humidity: HumidityForecast,
    pub time_horizon: String,
    pub activate_fan: bool,
}
