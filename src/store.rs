//! Model Store: persistence of trained (scaler, model) pairs per target.
//!
//! Artifacts use an explicit, versioned JSON schema rather than an opaque
//! object dump: hyperparameters, the flattened tree, the scaler ranges and
//! the evaluation metrics. Latest write wins; a save fully replaces the
//! previous artifact for that target.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::features::FeatureVector;
use crate::models::SensorKind;
use crate::scaler::ScalerArtifact;
use crate::trainer::EvaluationMetrics;
use crate::tree::{Hyperparameters, RegressionTree};

// ---

/// Bumped whenever the on-disk layout changes.
pub const SCHEMA_VERSION: u32 = 1;

/// A fitted tree and the hyperparameters it was grown with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub hyperparameters: Hyperparameters,
    pub tree: RegressionTree,
}

/// Everything persisted for one target variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetArtifacts {
    // ---
    pub schema_version: u32,
    pub target: SensorKind,
    pub trained_at: DateTime<Utc>,
    pub scaler: ScalerArtifact,
    pub model: ModelArtifact,
    pub metrics: EvaluationMetrics,
}

impl TargetArtifacts {
    /// Scale a raw feature vector with this target's scaler and predict.
    pub fn predict(&self, raw: &FeatureVector) -> f64 {
        self.model.tree.predict(&self.scaler.transform(raw))
    }

    /// Reject artifacts that were written by another schema, belong to another
    /// target, or are internally inconsistent.
    pub fn validate(&self, expected: SensorKind) -> Result<()> {
        // ---
        if self.schema_version != SCHEMA_VERSION {
            return Err(ForecastError::not_found(
                expected,
                format!(
                    "artifact schema version {} is not supported (expected {})",
                    self.schema_version, SCHEMA_VERSION
                ),
            ));
        }
        if self.target != expected {
            return Err(ForecastError::not_found(
                expected,
                format!("artifact was trained for {}", self.target),
            ));
        }
        self.scaler
            .validate()
            .and_then(|_| self.model.tree.validate())
            .map_err(|e| ForecastError::not_found(expected, e))
    }
}

/// Persistence boundary used by the trainer (writes) and the prediction
/// engine (reads).
pub trait ModelStore: Send {
    /// Store artifacts under `artifacts.target`, replacing any previous ones.
    fn save(&mut self, artifacts: &TargetArtifacts) -> Result<()>;

    /// Fails with [`ForecastError::ArtifactNotFound`] when nothing usable was
    /// saved for `target`. Returned artifacts have passed
    /// [`TargetArtifacts::validate`].
    fn load(&self, target: SensorKind) -> Result<TargetArtifacts>;

    fn contains(&self, target: SensorKind) -> bool;
}

impl ModelStore for Box<dyn ModelStore> {
    fn save(&mut self, artifacts: &TargetArtifacts) -> Result<()> {
        (**self).save(artifacts)
    }

    fn load(&self, target: SensorKind) -> Result<TargetArtifacts> {
        (**self).load(target)
    }

    fn contains(&self, target: SensorKind) -> bool {
        (**self).contains(target)
    }
}

/// Process-local store, used by tests and by callers that never persist.
#[derive(Debug, Default, Clone)]
pub struct InMemoryModelStore {
    artifacts: HashMap<SensorKind, TargetArtifacts>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(&mut self, artifacts: &TargetArtifacts) -> Result<()> {
        self.artifacts.insert(artifacts.target, artifacts.clone());
        Ok(())
    }

    fn load(&self, target: SensorKind) -> Result<TargetArtifacts> {
        // ---
        let artifacts = self
            .artifacts
            .get(&target)
            .cloned()
            .ok_or_else(|| ForecastError::not_found(target, "no artifact has been saved"))?;
        artifacts.validate(target)?;
        Ok(artifacts)
    }

    fn contains(&self, target: SensorKind) -> bool {
        self.artifacts.contains_key(&target)
    }
}

/// One JSON file per target under a root directory.
///
/// Saves go through a temporary file and a rename, so a concurrent reader
/// sees either the old or the new artifact, never a torn one.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    root: PathBuf,
}

impl FileModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, target: SensorKind) -> PathBuf {
        self.root.join(format!("{target}_model.json"))
    }
}

impl ModelStore for FileModelStore {
    fn save(&mut self, artifacts: &TargetArtifacts) -> Result<()> {
        // ---
        fs::create_dir_all(&self.root).map_err(|e| {
            ForecastError::Storage(format!("cannot create {}: {}", self.root.display(), e))
        })?;

        let path = self.path_for(artifacts.target);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(artifacts)
            .map_err(|e| ForecastError::Storage(format!("cannot serialize artifact: {e}")))?;

        fs::write(&tmp, body)
            .map_err(|e| ForecastError::Storage(format!("cannot write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path).map_err(|e| {
            ForecastError::Storage(format!("cannot move artifact into {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), "Wrote artifact file");
        Ok(())
    }

    fn load(&self, target: SensorKind) -> Result<TargetArtifacts> {
        // ---
        let path = self.path_for(target);
        let body = fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ForecastError::not_found(target, "no artifact has been saved"),
            _ => ForecastError::not_found(target, format!("cannot read {}: {}", path.display(), e)),
        })?;

        let artifacts: TargetArtifacts = serde_json::from_slice(&body).map_err(|e| {
            ForecastError::not_found(target, format!("unreadable artifact {}: {}", path.display(), e))
        })?;
        artifacts.validate(target)?;
        Ok(artifacts)
    }

    fn contains(&self, target: SensorKind) -> bool {
        self.path_for(target).is_file()
    }
}
