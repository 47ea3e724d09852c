//! Latest two readings per stream, kept between prediction requests.
//!
//! The live sensor feed reports one value at a time; the cache turns that
//! into the current/previous pairs a [`PredictionRequest`] needs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ForecastError, Result};
use crate::models::{PredictionRequest, RawReading, SensorKind};

// ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CachedSensor {
    pub current: Option<f64>,
    pub previous: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorCache {
    temperature: CachedSensor,
    humidity: CachedSensor,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensor(&self, kind: SensorKind) -> &CachedSensor {
        match kind {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Humidity => &self.humidity,
        }
    }

    fn sensor_mut(&mut self, kind: SensorKind) -> &mut CachedSensor {
        match kind {
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Humidity => &mut self.humidity,
        }
    }

    /// Push a new reading: the current value becomes the previous one.
    pub fn record(&mut self, kind: SensorKind, value: f64, timestamp: DateTime<Utc>) -> Result<()> {
        // ---
        if !value.is_finite() {
            return Err(ForecastError::InvalidInput(format!(
                "{kind} reading must be a finite number"
            )));
        }

        let sensor = self.sensor_mut(kind);
        sensor.previous = sensor.current;
        sensor.current = Some(value);
        sensor.timestamp = Some(timestamp);
        Ok(())
    }

    /// Replace one stream with its most recent readings (oldest first), as
    /// fetched from the sensor database. Only the last two are kept.
    pub fn seed(&mut self, kind: SensorKind, recent: &[RawReading]) {
        // ---
        let sensor = self.sensor_mut(kind);
        *sensor = CachedSensor::default();
        let start = recent.len().saturating_sub(2);
        for reading in &recent[start..] {
            sensor.previous = sensor.current;
            sensor.current = Some(reading.value);
            sensor.timestamp = Some(reading.timestamp);
        }
    }

    pub fn is_complete(&self) -> bool {
        [self.temperature, self.humidity]
            .iter()
            .all(|s| s.current.is_some() && s.previous.is_some())
    }

    /// Build a request from the cached values; every one of the four must be
    /// known.
    pub fn request(&self) -> Result<PredictionRequest> {
        // ---
        let need = |value: Option<f64>, what: &str| {
            value.ok_or_else(|| ForecastError::InvalidInput(format!("no {what} reading cached yet")))
        };

        Ok(PredictionRequest {
            current_temperature: need(self.temperature.current, "current temperature")?,
            previous_temperature: need(self.temperature.previous, "previous temperature")?,
            current_humidity: need(self.humidity.current, "current humidity")?,
            previous_humidity: need(self.humidity.previous, "previous humidity")?,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[test]
    fn test_record_shifts_current_to_previous() {
        // ---
        let mut cache = SensorCache::new();
        cache.record(SensorKind::Temperature, 20.5, t(0)).unwrap();
        cache.record(SensorKind::Temperature, 21.0, t(5)).unwrap();

        let sensor = cache.sensor(SensorKind::Temperature);
        assert_eq!(sensor.current, Some(21.0));
        assert_eq!(sensor.previous, Some(20.5));
        assert_eq!(sensor.timestamp, Some(t(5)));
    }

    #[test]
    fn test_request_needs_all_four_values() {
        // ---
        let mut cache = SensorCache::new();
        cache.record(SensorKind::Temperature, 20.5, t(0)).unwrap();
        cache.record(SensorKind::Temperature, 21.0, t(5)).unwrap();
        cache.record(SensorKind::Humidity, 55.0, t(5)).unwrap();

        assert!(!cache.is_complete());
        match cache.request() {
            Err(ForecastError::InvalidInput(msg)) => assert!(msg.contains("previous humidity")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }

        cache.record(SensorKind::Humidity, 56.0, t(10)).unwrap();
        let request = cache.request().unwrap();
        assert_eq!(request.current_temperature, 21.0);
        assert_eq!(request.previous_temperature, 20.5);
        assert_eq!(request.current_humidity, 56.0);
        assert_eq!(request.previous_humidity, 55.0);
    }

    #[test]
    fn test_seed_keeps_last_two() {
        // ---
        let mut cache = SensorCache::new();
        let recent: Vec<RawReading> = [50.0, 51.0, 52.0]
            .iter()
            .enumerate()
            .map(|(i, &value)| RawReading {
                value,
                timestamp: t(5 * i as i64),
            })
            .collect();

        cache.seed(SensorKind::Humidity, &recent);
        let sensor = cache.sensor(SensorKind::Humidity);
        assert_eq!(sensor.current, Some(52.0));
        assert_eq!(sensor.previous, Some(51.0));

        cache.seed(SensorKind::Humidity, &recent[..1]);
        assert_eq!(cache.sensor(SensorKind::Humidity).previous, None);
    }

    #[test]
    fn test_rejects_non_finite_reading() {
        // ---
        let mut cache = SensorCache::new();
        assert!(cache
            .record(SensorKind::Humidity, f64::INFINITY, t(0))
            .is_err());
        assert_eq!(*cache.sensor(SensorKind::Humidity), CachedSensor::default());
    }
}
