//! `POST /observations`: push one live sensor reading into the cache used by
//! `GET /predict`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Response, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AppState;
use crate::cache::CachedSensor;
use crate::{ForecastError, SensorKind};

// ---

#[derive(Debug, Deserialize)]
struct Observation {
    sensor_type: String,
    value: f64,
    /// Defaults to the service clock when omitted.
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct CacheSnapshot {
    temperature: CachedSensor,
    humidity: CachedSensor,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/observations", post(record_observation))
}

async fn record_observation(State(state): State<AppState>, Json(obs): Json<Observation>) -> Response {
    // ---
    let Some(kind) = SensorKind::from_sensor_type(&obs.sensor_type) else {
        return ForecastError::InvalidInput(format!("unknown sensor_type '{}'", obs.sensor_type))
            .into_response();
    };
    let timestamp = obs.timestamp.unwrap_or_else(|| state.clock.now());

    let mut cache = state.cache.lock().await;
    if let Err(e) = cache.record(kind, obs.value, timestamp) {
        return e.into_response();
    }
    debug!(%kind, value = obs.value, "Observation cached");

    let snapshot = CacheSnapshot {
        temperature: *cache.sensor(SensorKind::Temperature),
        humidity: *cache.sensor(SensorKind::Humidity),
    };
    (StatusCode::OK, Json(snapshot)).into_response()
}
