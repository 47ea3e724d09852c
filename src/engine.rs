//! Prediction Engine: one request in, one forecast and fan decision out.
//!
//! The band around each prediction is a fixed offset, not a statistical
//! interval; decision trees do not provide calibrated intervals.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{ForecastError, Result};
use crate::features::{self, Clock};
use crate::models::{
    HumidityForecast, PredictionRequest, PredictionResult, SensorKind, TemperatureForecast,
};
use crate::reporter::{Event, Reporter};
use crate::store::{ModelStore, TargetArtifacts};

// ---

/// Fan turns on strictly above this predicted temperature (°C).
pub const TEMPERATURE_THRESHOLD: f64 = 30.0;

/// Half-width of the temperature band (°C).
pub const TEMPERATURE_BAND: f64 = 0.5;

/// Half-width of the humidity band (percentage points).
pub const HUMIDITY_BAND: f64 = 2.0;

pub const TIME_HORIZON: &str = "5_minutes";

struct LoadedModels {
    temperature: TargetArtifacts,
    humidity: TargetArtifacts,
}

/// Serves predictions from the artifacts in a [`ModelStore`].
///
/// Artifacts are loaded on first use and cached until [`reload`] or
/// [`store_mut`] is called.
///
/// [`reload`]: PredictionEngine::reload
/// [`store_mut`]: PredictionEngine::store_mut
pub struct PredictionEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn Reporter>,
    models: Option<LoadedModels>,
}

impl<S: ModelStore> PredictionEngine<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            store,
            clock,
            reporter,
            models: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access for retraining. Drops the cached artifacts so the next
    /// prediction re-reads whatever was written.
    pub fn store_mut(&mut self) -> &mut S {
        self.models = None;
        &mut self.store
    }

    pub fn is_loaded(&self) -> bool {
        self.models.is_some()
    }

    /// Re-read both artifacts from the store. On failure the previous cache
    /// is dropped as well.
    pub fn reload(&mut self) -> Result<()> {
        // ---
        self.models = None;
        self.models = Some(self.load_models()?);
        self.reporter.report(Event::ArtifactsLoaded);
        Ok(())
    }

    /// Validate a JSON-shaped request, then predict. Invalid input is
    /// rejected before any artifact is touched.
    pub fn predict_json(&mut self, value: &Value) -> Result<PredictionResult> {
        let request = PredictionRequest::from_value(value)?;
        self.predict(&request)
    }

    pub fn predict(&mut self, request: &PredictionRequest) -> Result<PredictionResult> {
        // ---
        let fields = [
            request.current_temperature,
            request.previous_temperature,
            request.current_humidity,
            request.previous_humidity,
        ];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidInput(
                "request values must be finite numbers".into(),
            ));
        }

        if self.models.is_none() {
            self.reload()?;
        }
        let models = self.models.as_ref().ok_or_else(|| {
            ForecastError::not_found(SensorKind::Temperature, "artifacts not loaded")
        })?;

        let now = self.clock.now();
        let raw = features::online_row(request, now, self.clock.offset()).vector();

        // Same raw vector, scaled separately by each target's own scaler.
        let pred_temp = models.temperature.predict(&raw);
        let pred_humid = models.humidity.predict(&raw);

        let result = decide(now, request, pred_temp, pred_humid);

        self.reporter.report(Event::Predicted {
            temperature: pred_temp,
            humidity: pred_humid,
            activate_fan: result.activate_fan,
        });
        if result.activate_fan {
            self.reporter.report(Event::FanActivation {
                predicted: pred_temp,
                threshold: TEMPERATURE_THRESHOLD,
            });
        }
        Ok(result)
    }

    fn load_models(&self) -> Result<LoadedModels> {
        Ok(LoadedModels {
            temperature: self.load_one(SensorKind::Temperature)?,
            humidity: self.load_one(SensorKind::Humidity)?,
        })
    }

    /// Stores validate what they load; any other failure still reads as
    /// "not trained" to the caller.
    fn load_one(&self, target: SensorKind) -> Result<TargetArtifacts> {
        self.store.load(target).map_err(|e| match e {
            ForecastError::ArtifactNotFound { .. } => e,
            other => ForecastError::not_found(target, other),
        })
    }
}

/// Turn two raw predictions into the response: fixed bands clamped to
/// physical ranges, threshold check and fan decision.
pub fn decide(
    now: DateTime<Utc>,
    request: &PredictionRequest,
    pred_temp: f64,
    pred_humid: f64,
) -> PredictionResult {
    // ---
    let exceeds_threshold = pred_temp > TEMPERATURE_THRESHOLD;

    PredictionResult {
        prediction_time: now,
        temperature: TemperatureForecast {
            current: request.current_temperature,
            predicted: pred_temp,
            lower_bound: (pred_temp - TEMPERATURE_BAND).max(0.0),
            upper_bound: pred_temp + TEMPERATURE_BAND,
            exceeds_threshold,
            threshold: TEMPERATURE_THRESHOLD,
        },
        humidity: HumidityForecast {
            current: request.current_humidity,
            predicted: pred_humid,
            lower_bound: (pred_humid - HUMIDITY_BAND).max(0.0),
            upper_bound: (pred_humid + HUMIDITY_BAND).min(100.0),
        },
        time_horizon: TIME_HORIZON.to_string(),
        activate_fan: exceeds_threshold,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::features::{FeatureVector, FixedClock};
    use crate::reporter::{MemoryReporter, NullReporter};
    use crate::store::tests::constant_artifacts;
    use crate::scaler::ScalerArtifact;
    use crate::store::{FileModelStore, InMemoryModelStore};
    use crate::tree::RegressionTree;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap()
    }

    fn request() -> PredictionRequest {
        PredictionRequest {
            current_temperature: 21.0,
            previous_temperature: 20.5,
            current_humidity: 55.0,
            previous_humidity: 54.0,
        }
    }

    /// Counts loads so tests can prove no model was touched.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryModelStore,
        loads: Arc<AtomicUsize>,
    }

    impl ModelStore for CountingStore {
        fn save(&mut self, artifacts: &TargetArtifacts) -> Result<()> {
            self.inner.save(artifacts)
        }

        fn load(&self, target: SensorKind) -> Result<TargetArtifacts> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(target)
        }

        fn contains(&self, target: SensorKind) -> bool {
            self.inner.contains(target)
        }
    }

    fn engine_with(temp: f64, humid: f64) -> (PredictionEngine<CountingStore>, Arc<MemoryReporter>) {
        // ---
        let mut store = CountingStore::default();
        store
            .save(&constant_artifacts(SensorKind::Temperature, temp))
            .unwrap();
        store
            .save(&constant_artifacts(SensorKind::Humidity, humid))
            .unwrap();
        let reporter = Arc::new(MemoryReporter::new());
        let engine = PredictionEngine::new(store, Arc::new(FixedClock::utc(now())), reporter.clone());
        (engine, reporter)
    }

    #[test]
    fn test_threshold_is_strict() {
        // ---
        let hot = decide(now(), &request(), 31.0, 50.0);
        assert!(hot.activate_fan);
        assert!(hot.temperature.exceeds_threshold);

        let mild = decide(now(), &request(), 29.9, 50.0);
        assert!(!mild.activate_fan);
        assert!(!mild.temperature.exceeds_threshold);

        let edge = decide(now(), &request(), 30.0, 50.0);
        assert!(!edge.activate_fan);
    }

    #[test]
    fn test_bounds_are_clamped() {
        // ---
        let result = decide(now(), &request(), 0.2, 99.5);
        assert_eq!(result.temperature.lower_bound, 0.0);
        assert_eq!(result.temperature.upper_bound, 0.2 + TEMPERATURE_BAND);
        assert_eq!(result.humidity.upper_bound, 100.0);
        assert_eq!(result.humidity.lower_bound, 97.5);

        let dry = decide(now(), &request(), 25.0, 1.0);
        assert_eq!(dry.humidity.lower_bound, 0.0);
        assert_eq!(dry.temperature.lower_bound, 24.5);
        assert_eq!(dry.temperature.upper_bound, 25.5);
    }

    #[test]
    fn test_result_shape() {
        // ---
        let result = decide(now(), &request(), 22.0, 56.0);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["time_horizon"], json!("5_minutes"));
        assert_eq!(value["temperature"]["current"], json!(21.0));
        assert_eq!(value["temperature"]["threshold"], json!(30.0));
        assert_eq!(value["humidity"]["current"], json!(55.0));
        assert_eq!(value["activate_fan"], json!(false));
        assert!(value["humidity"].get("threshold").is_none());
        assert_eq!(value["prediction_time"], json!("2025-06-01T14:00:00Z"));
    }

    #[test]
    fn test_predict_uses_both_models() {
        // ---
        let (mut engine, reporter) = engine_with(31.0, 60.0);
        let result = engine.predict(&request()).unwrap();

        assert_eq!(result.temperature.predicted, 31.0);
        assert_eq!(result.humidity.predicted, 60.0);
        assert!(result.activate_fan);
        assert_eq!(result.prediction_time, now());
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, Event::FanActivation { .. })));
    }

    #[test]
    fn test_artifacts_are_cached_until_reload() {
        // ---
        let (mut engine, _) = engine_with(22.0, 50.0);
        let loads = engine.store().loads.clone();

        engine.predict(&request()).unwrap();
        engine.predict(&request()).unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        engine
            .store_mut()
            .save(&constant_artifacts(SensorKind::Temperature, 33.0))
            .unwrap();
        assert!(!engine.is_loaded());
        let result = engine.predict(&request()).unwrap();
        assert_eq!(result.temperature.predicted, 33.0);
        assert_eq!(loads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_missing_field_never_reaches_models() {
        // ---
        let (mut engine, _) = engine_with(22.0, 50.0);
        let loads = engine.store().loads.clone();
        let body = json!({
            "current_temperature": 21.0,
            "previous_temperature": 20.5,
            "current_humidity": 55.0
        });

        assert!(matches!(
            engine.predict_json(&body),
            Err(ForecastError::InvalidInput(_))
        ));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_untrained_store_is_not_found() {
        // ---
        let mut engine = PredictionEngine::new(
            InMemoryModelStore::new(),
            Arc::new(FixedClock::utc(now())),
            Arc::new(NullReporter),
        );

        assert!(matches!(
            engine.predict(&request()),
            Err(ForecastError::ArtifactNotFound {
                target: SensorKind::Temperature,
                ..
            })
        ));
    }

    #[test]
    fn test_half_trained_store_is_not_found() {
        // ---
        let mut store = InMemoryModelStore::new();
        store
            .save(&constant_artifacts(SensorKind::Temperature, 22.0))
            .unwrap();
        let mut engine =
            PredictionEngine::new(store, Arc::new(FixedClock::utc(now())), Arc::new(NullReporter));

        assert!(matches!(
            engine.predict(&request()),
            Err(ForecastError::ArtifactNotFound {
                target: SensorKind::Humidity,
                ..
            })
        ));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_stale_schema_on_disk_is_not_found() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileModelStore::new(dir.path());
        let mut stale = constant_artifacts(SensorKind::Temperature, 22.0);
        stale.schema_version = 99;
        store.save(&stale).unwrap();
        store
            .save(&constant_artifacts(SensorKind::Humidity, 50.0))
            .unwrap();

        let mut engine =
            PredictionEngine::new(store, Arc::new(FixedClock::utc(now())), Arc::new(NullReporter));
        match engine.predict(&request()) {
            Err(ForecastError::ArtifactNotFound { target, reason }) => {
                assert_eq!(target, SensorKind::Temperature);
                assert!(reason.contains("schema version 99"));
            }
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_online_bucket_follows_clock_offset() {
        // ---
        // Trees that split on time_of_day only: evening predicts 30, earlier 20.
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 23, 30, 0).unwrap();
        let x: Vec<FeatureVector> = (0..40)
            .map(|i| [(i % 4) as f64, 1.0 + (i % 3) as f64, 1.0, 1.0, 1.0])
            .collect();
        let y: Vec<f64> = x.iter().map(|v| if v[0] == 3.0 { 30.0 } else { 20.0 }).collect();

        let mut store = InMemoryModelStore::new();
        for target in SensorKind::ALL {
            let mut artifacts = constant_artifacts(target, 0.0);
            artifacts.scaler = ScalerArtifact::fit(&x).unwrap();
            let scaled = artifacts.scaler.transform_all(&x);
            artifacts.model.tree =
                RegressionTree::fit(&scaled, &y, artifacts.model.hyperparameters).unwrap();
            store.save(&artifacts).unwrap();
        }

        let mut utc_engine = PredictionEngine::new(
            store.clone(),
            Arc::new(FixedClock::utc(at)),
            Arc::new(NullReporter),
        );
        let east = chrono::FixedOffset::east_opt(7 * 3600).unwrap();
        let mut local_engine =
            PredictionEngine::new(store, Arc::new(FixedClock::new(at, east)), Arc::new(NullReporter));

        assert_eq!(utc_engine.predict(&request()).unwrap().temperature.predicted, 30.0);
        let local = local_engine.predict(&request()).unwrap();
        assert_eq!(local.temperature.predicted, 20.0);
        assert_eq!(local.prediction_time, at);
    }
}
