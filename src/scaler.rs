//! Column-wise min-max scaler.

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::features::{FeatureVector, FEATURE_COUNT};

// ---

/// Per-column minimum and maximum learned from a training matrix.
///
/// `scale(x) = (x - min) / (max - min)`. A column whose range is zero is
/// divided by 1 instead, so it maps to 0 for training values. Values outside
/// the fitted range are not clipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl ScalerArtifact {
    /// Learn the column ranges. Fails on an empty or non-finite matrix, and
    /// when every column is constant (nothing left to learn from).
    pub fn fit(rows: &[FeatureVector]) -> Result<Self, FitError> {
        // ---
        if rows.is_empty() {
            return Err(FitError::EmptyInput);
        }

        let mut min = vec![f64::INFINITY; FEATURE_COUNT];
        let mut max = vec![f64::NEG_INFINITY; FEATURE_COUNT];
        for row in rows {
            for (column, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    return Err(FitError::NonFinite { column });
                }
                min[column] = min[column].min(value);
                max[column] = max[column].max(value);
            }
        }

        if min.iter().zip(&max).all(|(lo, hi)| hi - lo == 0.0) {
            return Err(FitError::SingularRange);
        }

        Ok(ScalerArtifact { min, max })
    }

    pub fn transform(&self, row: &FeatureVector) -> FeatureVector {
        // ---
        let mut scaled = [0.0; FEATURE_COUNT];
        for (column, slot) in scaled.iter_mut().enumerate() {
            let range = self.max[column] - self.min[column];
            let range = if range == 0.0 { 1.0 } else { range };
            *slot = (row[column] - self.min[column]) / range;
        }
        scaled
    }

    pub fn transform_all(&self, rows: &[FeatureVector]) -> Vec<FeatureVector> {
        rows.iter().map(|row| self.transform(row)).collect()
    }

    /// Check a deserialized artifact before it is used.
    pub fn validate(&self) -> Result<(), FitError> {
        // ---
        if self.min.len() != FEATURE_COUNT || self.max.len() != FEATURE_COUNT {
            return Err(FitError::Malformed(format!(
                "scaler has {}/{} columns, expected {}",
                self.min.len(),
                self.max.len(),
                FEATURE_COUNT
            )));
        }
        for (column, (lo, hi)) in self.min.iter().zip(&self.max).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(FitError::Malformed(format!(
                    "scaler column {column} has range [{lo}, {hi}]"
                )));
            }
        }
        Ok(())
    }
}
