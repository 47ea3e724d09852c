//! `POST /train`: retrain both targets from the sensor database and swap the
//! new artifacts into the running engine.
//!
//! Fitting runs on a blocking thread against a staging store. The engine lock
//! is only taken to copy finished artifacts in, so predictions keep being
//! served from the old models while training runs.

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, response::Response, routing::post, Json, Router};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{anyhow_response, AppState};
use crate::trainer::TrainingRun;
use crate::{source, InMemoryModelStore, ModelStore, RawReading, SensorKind, Trainer};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/train", post(train))
}

async fn train(State(state): State<AppState>) -> Response {
    // ---
    let Some(pool) = &state.pool else {
        warn!("POST /train without a configured database");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no database configured; set DATABASE_URL" })),
        )
            .into_response();
    };

    let temperature = match source::fetch_stream(pool, SensorKind::Temperature).await {
        Ok(readings) => readings,
        Err(e) => return anyhow_response(e),
    };
    let humidity = match source::fetch_stream(pool, SensorKind::Humidity).await {
        Ok(readings) => readings,
        Err(e) => return anyhow_response(e),
    };

    train_and_publish(&state, temperature, humidity).await
}

async fn train_and_publish(
    state: &AppState,
    temperature: Vec<RawReading>,
    humidity: Vec<RawReading>,
) -> Response {
    // ---
    let reporter = state.reporter.clone();
    let clock = state.clock.clone();
    let fitted = tokio::task::spawn_blocking(move || {
        let mut staging = InMemoryModelStore::new();
        let run = Trainer::new(&mut staging, &*reporter, &*clock).run(&temperature, &humidity);
        run.map(|run| (staging, run))
    })
    .await;

    let (staging, run) = match fitted {
        Ok(Ok(fitted)) => fitted,
        Ok(Err(e)) => return e.into_response(),
        Err(e) => return anyhow_response(anyhow::anyhow!("Training task failed: {e}")),
    };

    let mut engine = state.engine.lock().await;
    if let Err(e) = publish(&staging, &run, engine.store_mut()) {
        return e.into_response();
    }

    if run.is_complete() {
        if let Err(e) = engine.reload() {
            return e.into_response();
        }
        info!("Retrained models are live");
    }
    run_response(&run)
}

/// Copy every target that trained successfully from `staging` into `live`.
fn publish(staging: &InMemoryModelStore, run: &TrainingRun, live: &mut dyn ModelStore) -> crate::Result<()> {
    // ---
    for kind in SensorKind::ALL {
        if run.outcome(kind).is_ok() {
            live.save(&staging.load(kind)?)?;
        }
    }
    Ok(())
}

/// 200 with both reports when every target trained; 422 otherwise, still
/// listing what did succeed.
fn run_response(run: &TrainingRun) -> Response {
    // ---
    let mut body = BTreeMap::<&str, Value>::new();
    for kind in SensorKind::ALL {
        let entry = match run.outcome(kind) {
            Ok(report) => json!({ "report": report }),
            Err(e) => json!({ "error": e.to_string() }),
        };
        body.insert(kind.as_str(), entry);
    }

    let status = if run.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(body)).into_response()
}
