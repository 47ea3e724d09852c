//! Prediction endpoints.
//!
//! - `POST /predict` takes the four current/previous values as JSON.
//! - `GET /predict` uses the live sensor cache, topping it up from the
//!   database when it does not yet hold two readings per stream.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, response::Response, routing::get,
    Json, Router,
};
use serde_json::Value;
use tracing::{debug, info};

use super::{anyhow_response, AppState};
use crate::{source, SensorKind};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/predict", get(predict_cached).post(predict_body))
}

async fn predict_body(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    // ---
    info!("POST /predict");
    let mut engine = state.engine.lock().await;
    match engine.predict_json(&body) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn predict_cached(State(state): State<AppState>) -> Response {
    // ---
    info!("GET /predict");
    let mut cache = state.cache.lock().await;

    if !cache.is_complete() {
        if let Some(pool) = &state.pool {
            debug!("Sensor cache incomplete, loading recent readings from database");
            for kind in SensorKind::ALL {
                match source::fetch_recent(pool, kind, 2).await {
                    Ok(recent) if recent.len() == 2 => cache.seed(kind, &recent),
                    Ok(recent) => debug!(%kind, found = recent.len(), "Not enough recent readings"),
                    Err(e) => return anyhow_response(e),
                }
            }
        }
    }

    let request = match cache.request() {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    drop(cache);

    let mut engine = state.engine.lock().await;
    match engine.predict(&request) {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => e.into_response(),
    }
}
