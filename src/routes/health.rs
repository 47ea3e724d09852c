// src/routes/health.rs
//! Health check endpoint for the forecasting service.
//!
//! Besides liveness, `/health` reports which targets have a trained artifact
//! in the model store, so operators can tell "up but untrained" apart from
//! "ready to predict" without issuing a prediction.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::SensorKind;

/// JSON response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    models: ModelsPresent,
}

#[derive(Debug, Serialize)]
struct ModelsPresent {
    temperature: bool,
    humidity: bool,
}

/// Handle `GET /health`.
///
/// Does not touch the database; only checks artifact presence.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    // ---
    let engine = state.engine.lock().await;
    let store = engine.store();

    Json(HealthResponse {
        status: "ok",
        models: ModelsPresent {
            temperature: store.contains(SensorKind::Temperature),
            humidity: store.contains(SensorKind::Humidity),
        },
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
