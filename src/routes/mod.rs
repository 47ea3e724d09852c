//! HTTP gateway for the forecasting service.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared [`AppState`], so `main.rs` never sees individual
//! endpoints.

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::{Clock, ForecastError, ModelStore, PredictionEngine, Reporter, SensorCache};

mod health;
mod observations;
mod predict;
mod train;

// ---

/// Engine over a type-erased store so tests can swap in memory storage.
pub type SharedEngine = Arc<Mutex<PredictionEngine<Box<dyn ModelStore>>>>;

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub engine: SharedEngine,
    pub cache: Arc<Mutex<SensorCache>>,
    /// `None` when no database is configured; training is then unavailable.
    pub pool: Option<PgPool>,
    pub clock: Arc<dyn Clock>,
    pub reporter: Arc<dyn Reporter>,
}

impl AppState {
    pub fn new(
        store: Box<dyn ModelStore>,
        pool: Option<PgPool>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        // ---
        let engine = PredictionEngine::new(store, clock.clone(), reporter.clone());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            cache: Arc::new(Mutex::new(SensorCache::new())),
            pool,
            clock,
            reporter,
        }
    }
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(predict::router())
        .merge(observations::router())
        .merge(train::router())
        .merge(health::router())
        .with_state(state)
}

/// Status code for each failure kind.
pub(crate) fn status_for(error: &ForecastError) -> StatusCode {
    // ---
    match error {
        ForecastError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ForecastError::ArtifactNotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ForecastError::InsufficientData { .. }
        | ForecastError::Alignment(_)
        | ForecastError::Training { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ForecastError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ForecastError {
    fn into_response(self) -> Response {
        // ---
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Map glue-level failures: a wrapped [`ForecastError`] keeps its status,
/// anything else (database, I/O) is a 500.
pub(crate) fn anyhow_response(error: anyhow::Error) -> Response {
    // ---
    match error.downcast::<ForecastError>() {
        Ok(forecast) => forecast.into_response(),
        Err(other) => {
            tracing::error!("Request failed: {:#}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{other:#}") })),
            )
                .into_response()
        }
    }
}
