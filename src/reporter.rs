//! Reporting collaborator injected into the core components.
//!
//! The aligner, trainer and prediction engine describe what they did through
//! a [`Reporter`] instead of logging to a process-wide sink, so tests can
//! assert on the events and run without any subscriber installed. The binary
//! wires in [`TracingReporter`], which forwards everything to `tracing`.

use std::sync::Mutex;

use crate::models::SensorKind;
use crate::trainer::EvaluationMetrics;
use crate::tree::Hyperparameters;

// ---

/// Domain events emitted by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Sensor streams merged onto the grid.
    Aligned {
        temperature_samples: usize,
        humidity_samples: usize,
        duplicates_dropped: usize,
        grid_rows: usize,
        stale_rows_dropped: usize,
    },
    /// Training table built from aligned records.
    FeaturesDerived { rows: usize, dropped: usize },
    /// One grid-search candidate scored by cross-validation.
    CandidateScored {
        target: SensorKind,
        hyperparameters: Hyperparameters,
        cv_mse: f64,
    },
    /// Winning hyperparameters for a target.
    ModelSelected {
        target: SensorKind,
        hyperparameters: Hyperparameters,
        cv_mse: f64,
    },
    /// Held-out evaluation for a target.
    Evaluated {
        target: SensorKind,
        metrics: EvaluationMetrics,
    },
    ArtifactsSaved { target: SensorKind },
    TrainingFailed { target: SensorKind, reason: String },
    ArtifactsLoaded,
    Predicted {
        temperature: f64,
        humidity: f64,
        activate_fan: bool,
    },
    /// Predicted temperature crossed the fan threshold.
    FanActivation { predicted: f64, threshold: f64 },
}

pub trait Reporter: Send + Sync {
    fn report(&self, event: Event);
}

/// Forwards events to the global `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: Event) {
        // ---
        match event {
            Event::Aligned {
                temperature_samples,
                humidity_samples,
                duplicates_dropped,
                grid_rows,
                stale_rows_dropped,
            } => tracing::info!(
                temperature_samples,
                humidity_samples,
                duplicates_dropped,
                grid_rows,
                stale_rows_dropped,
                "Aligned sensor streams"
            ),
            Event::FeaturesDerived { rows, dropped } => {
                tracing::info!(rows, dropped, "Derived training features")
            }
            Event::CandidateScored {
                target,
                hyperparameters,
                cv_mse,
            } => tracing::debug!(
                %target,
                max_depth = hyperparameters.max_depth,
                min_samples_leaf = hyperparameters.min_samples_leaf,
                cv_mse,
                "Scored candidate"
            ),
            Event::ModelSelected {
                target,
                hyperparameters,
                cv_mse,
            } => tracing::info!(
                %target,
                max_depth = hyperparameters.max_depth,
                min_samples_leaf = hyperparameters.min_samples_leaf,
                cv_mse,
                "Selected hyperparameters"
            ),
            Event::Evaluated { target, metrics } => tracing::info!(
                %target,
                "Evaluation - MSE: {:.4}, MAE: {:.4}, R²: {:.4}",
                metrics.mse,
                metrics.mae,
                metrics.r2
            ),
            Event::ArtifactsSaved { target } => tracing::info!(%target, "Saved model artifacts"),
            Event::TrainingFailed { target, reason } => {
                tracing::error!(%target, "Training failed: {}", reason)
            }
            Event::ArtifactsLoaded => tracing::info!("Models loaded successfully"),
            Event::Predicted {
                temperature,
                humidity,
                activate_fan,
            } => tracing::info!(
                activate_fan,
                "Prediction completed - Temperature: {:.2}°C, Humidity: {:.2}%",
                temperature,
                humidity
            ),
            Event::FanActivation {
                predicted,
                threshold,
            } => tracing::warn!(
                "Predicted temperature ({:.2}°C) exceeds threshold ({:.2}°C), fan should be activated",
                predicted,
                threshold
            ),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: Event) {}
}

/// Keeps events in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<Event>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn events(&self) -> Vec<Event> {
        // ---
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: Event) {
        // ---
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
