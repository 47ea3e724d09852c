//! Short-horizon climate forecasting for the YoloHome smart home.
//!
//! The crate turns raw temperature and humidity readings into an aligned
//! five-minute series, trains one regression tree per target, and serves
//! five-minute-ahead predictions together with a fan on/off decision.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): the
//! binary and the HTTP routes only reach the core through the re-exports
//! below.

pub mod aligner;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod models;
pub mod reporter;
pub mod routes;
pub mod scaler;
pub mod source;
pub mod store;
pub mod trainer;
pub mod tree;

pub use cache::SensorCache;
pub use config::Config;
pub use engine::PredictionEngine;
pub use error::{FitError, ForecastError, Result};
pub use features::{Clock, FeatureRow, FixedClock, SystemClock, TrainingRow};
pub use models::{AlignedRecord, PredictionRequest, PredictionResult, RawReading, SensorKind};
pub use reporter::{MemoryReporter, NullReporter, Reporter, TracingReporter};
pub use store::{FileModelStore, InMemoryModelStore, ModelStore, TargetArtifacts};
pub use trainer::{Trainer, TrainingReport, TrainingRun};
