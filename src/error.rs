//! Error taxonomy for the forecasting core.
//!
//! Every component fails fast with the most specific variant it can name and
//! never substitutes a default value. The binary and HTTP glue wrap these in
//! `anyhow` or map them to status codes; the core itself only ever returns
//! [`ForecastError`].

use thiserror::Error;

use crate::models::SensorKind;

// ---

/// Convenience alias used across the library.
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors surfaced by the aligner, feature deriver, trainer, store and engine.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// Fewer aligned rows than training requires.
    #[error("Insufficient data: need at least {required} aligned rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Malformed raw input; the whole batch is rejected.
    #[error("Alignment failed: {0}")]
    Alignment(String),

    /// Missing or non-numeric request field.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Fitting the scaler or model for one target failed.
    #[error("Training failed for {target}: {reason}")]
    Training { target: SensorKind, reason: String },

    /// No usable artifact exists for the target.
    #[error("No trained artifact for {target}: {reason}")]
    ArtifactNotFound { target: SensorKind, reason: String },

    /// Writing an artifact failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ForecastError {
    // ---
    pub(crate) fn training(target: SensorKind, reason: impl ToString) -> Self {
        ForecastError::Training {
            target,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn not_found(target: SensorKind, reason: impl ToString) -> Self {
        ForecastError::ArtifactNotFound {
            target,
            reason: reason.to_string(),
        }
    }
}

/// Low-level failures of the numeric building blocks (scaler, tree, folds).
///
/// The trainer attaches the target variable and turns these into
/// [`ForecastError::Training`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("feature matrix is empty")]
    EmptyInput,

    #[error("feature matrix has {rows} rows but {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("non-finite value in column {column}")]
    NonFinite { column: usize },

    #[error("every feature column has a zero range")]
    SingularRange,

    #[error("need at least {required} samples, got {actual}")]
    NotEnoughSamples { required: usize, actual: usize },

    #[error("malformed artifact: {0}")]
    Malformed(String),
}
