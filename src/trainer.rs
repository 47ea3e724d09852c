//! Model Trainer: one scaler and one regression tree per target variable.
//!
//! For each target the trainer
//! 1. fits a min-max scaler on the five feature columns of the whole table
//! 2. shuffles rows with a fixed seed and holds out 20% for testing
//! 3. scores every grid candidate by 5-fold cross-validated MSE on the
//!    training part, keeping the first candidate with the lowest score
//! 4. refits the winner on the full training part and evaluates it on the
//!    held-out rows
//! 5. saves scaler and tree together
//!
//! Temperature and humidity are trained independently: a failure for one
//! target neither skips nor touches the other.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::aligner;
use crate::error::{FitError, ForecastError, Result};
use crate::features::{self, Clock, FeatureRow, FeatureVector, TrainingRow};
use crate::models::{RawReading, SensorKind};
use crate::reporter::{Event, Reporter};
use crate::scaler::ScalerArtifact;
use crate::store::{ModelArtifact, ModelStore, TargetArtifacts, SCHEMA_VERSION};
use crate::tree::{Hyperparameters, RegressionTree};

// ---

pub const MAX_DEPTH_GRID: [usize; 4] = [4, 6, 8, 10];
pub const MIN_SAMPLES_LEAF_GRID: [usize; 4] = [5, 10, 20, 30];
pub const CV_FOLDS: usize = 5;
pub const SPLIT_SEED: u64 = 42;
pub const TEST_FRACTION: f64 = 0.2;

/// Held-out evaluation of a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub mse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl EvaluationMetrics {
    /// MSE, MAE and R². When the actual values are constant R² is 1.0 for a
    /// perfect fit and 0.0 otherwise, so the metrics stay finite.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        // ---
        let n = actual.len().min(predicted.len()).max(1) as f64;
        let pairs = || actual.iter().zip(predicted);

        let ss_res: f64 = pairs().map(|(a, p)| (a - p).powi(2)).sum();
        let abs: f64 = pairs().map(|(a, p)| (a - p).abs()).sum();
        let mean = actual.iter().sum::<f64>() / n;
        let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

        let r2 = if ss_tot == 0.0 {
            if ss_res == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - ss_res / ss_tot
        };

        EvaluationMetrics {
            mse: ss_res / n,
            mae: abs / n,
            r2,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.mse.is_finite() && self.mae.is_finite() && self.r2.is_finite()
    }
}

/// Candidate grid in search order: `max_depth` outer, `min_samples_leaf`
/// inner. Ties are broken by this order.
pub fn hyperparameter_grid() -> Vec<Hyperparameters> {
    // ---
    MAX_DEPTH_GRID
        .iter()
        .flat_map(|&max_depth| {
            MIN_SAMPLES_LEAF_GRID
                .iter()
                .map(move |&min_samples_leaf| Hyperparameters {
                    max_depth,
                    min_samples_leaf,
                })
        })
        .collect()
}

/// Shuffle `0..n` with `seed` and cut off `ceil(n * test_fraction)` indices
/// for testing. Returns `(train, test)`.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> std::result::Result<(Vec<usize>, Vec<usize>), FitError> {
    // ---
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(FitError::NotEnoughSamples {
            required: 2,
            actual: n,
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = order.split_off(n_test);
    Ok((train, order))
}

/// Contiguous, unshuffled folds over `0..n`. The first `n % k` folds take
/// one extra sample. Returns `(fit, validate)` index pairs.
pub fn k_fold(n: usize, k: usize) -> std::result::Result<Vec<(Vec<usize>, Vec<usize>)>, FitError> {
    // ---
    if k < 2 || n < k {
        return Err(FitError::NotEnoughSamples {
            required: k.max(2),
            actual: n,
        });
    }

    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = n / k + usize::from(fold < n % k);
        let validate: Vec<usize> = (start..start + size).collect();
        let fit: Vec<usize> = (0..start).chain(start + size..n).collect();
        folds.push((fit, validate));
        start += size;
    }
    Ok(folds)
}

/// Cross-validated score of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateScore {
    pub hyperparameters: Hyperparameters,
    pub cv_mse: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchOutcome {
    pub best: CandidateScore,
    /// Every candidate, in grid order.
    pub candidates: Vec<CandidateScore>,
}

/// Score each candidate by mean validation MSE over `folds` folds and keep
/// the first one with the lowest score.
pub fn grid_search(
    x: &[FeatureVector],
    y: &[f64],
    grid: &[Hyperparameters],
    folds: usize,
) -> std::result::Result<GridSearchOutcome, FitError> {
    // ---
    let splits = k_fold(x.len(), folds)?;
    let mut candidates = Vec::with_capacity(grid.len());
    let mut best: Option<CandidateScore> = None;

    for &params in grid {
        let mut total = 0.0;
        for (fit_idx, val_idx) in &splits {
            let fit_x: Vec<FeatureVector> = fit_idx.iter().map(|&i| x[i]).collect();
            let fit_y: Vec<f64> = fit_idx.iter().map(|&i| y[i]).collect();
            let tree = RegressionTree::fit(&fit_x, &fit_y, params)?;

            let actual: Vec<f64> = val_idx.iter().map(|&i| y[i]).collect();
            let predicted: Vec<f64> = val_idx.iter().map(|&i| tree.predict(&x[i])).collect();
            total += EvaluationMetrics::compute(&actual, &predicted).mse;
        }

        let score = CandidateScore {
            hyperparameters: params,
            cv_mse: total / splits.len() as f64,
        };
        if score.cv_mse.is_finite() && best.map_or(true, |b| score.cv_mse < b.cv_mse) {
            best = Some(score);
        }
        candidates.push(score);
    }

    let best = best.ok_or(FitError::EmptyInput)?;
    Ok(GridSearchOutcome { best, candidates })
}

/// Summary of one successful target training.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub target: SensorKind,
    pub hyperparameters: Hyperparameters,
    pub cv_mse: f64,
    pub metrics: EvaluationMetrics,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// Outcome of a full run; each target succeeds or fails on its own.
#[derive(Debug)]
pub struct TrainingRun {
    pub temperature: Result<TrainingReport>,
    pub humidity: Result<TrainingReport>,
}

impl TrainingRun {
    pub fn outcome(&self, target: SensorKind) -> &Result<TrainingReport> {
        match target {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Humidity => &self.humidity,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.temperature.is_ok() && self.humidity.is_ok()
    }

    /// Both reports, or the first failure in training order.
    pub fn into_reports(self) -> Result<[TrainingReport; 2]> {
        Ok([self.temperature?, self.humidity?])
    }
}

/// Fits artifacts and writes them to a [`ModelStore`].
pub struct Trainer<'a> {
    store: &'a mut dyn ModelStore,
    reporter: &'a dyn Reporter,
    clock: &'a dyn Clock,
}

impl<'a> Trainer<'a> {
    pub fn new(store: &'a mut dyn ModelStore, reporter: &'a dyn Reporter, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            reporter,
            clock,
        }
    }

    /// Full offline path: align the raw streams, derive features, train both
    /// targets. Alignment failures abort before any training starts.
    pub fn run(&mut self, temperature: &[RawReading], humidity: &[RawReading]) -> Result<TrainingRun> {
        // ---
        let records = aligner::align(temperature, humidity, self.reporter)?;
        let rows = features::derive_training_rows(&records, self.clock.offset(), self.reporter);
        Ok(self.train_all(&rows))
    }

    /// Train temperature, then humidity, independently.
    pub fn train_all(&mut self, rows: &[TrainingRow]) -> TrainingRun {
        // ---
        let table: Vec<FeatureRow> = rows.iter().map(|r| r.features).collect();
        TrainingRun {
            temperature: self.train_target(&table, SensorKind::Temperature),
            humidity: self.train_target(&table, SensorKind::Humidity),
        }
    }

    /// Train and persist one target. Nothing is saved unless both the scaler
    /// and the tree were fitted and evaluated.
    pub fn train_target(&mut self, rows: &[FeatureRow], target: SensorKind) -> Result<TrainingReport> {
        // ---
        let result = self.fit_target(rows, target).and_then(|(artifacts, report)| {
            self.store.save(&artifacts)?;
            self.reporter.report(Event::ArtifactsSaved { target });
            Ok(report)
        });

        if let Err(e) = &result {
            self.reporter.report(Event::TrainingFailed {
                target,
                reason: e.to_string(),
            });
        }
        result
    }

    fn fit_target(&self, rows: &[FeatureRow], target: SensorKind) -> Result<(TargetArtifacts, TrainingReport)> {
        // ---
        let fail = |e: FitError| ForecastError::training(target, e);

        let x: Vec<FeatureVector> = rows.iter().map(FeatureRow::vector).collect();
        let y: Vec<f64> = rows
            .iter()
            .map(|r| r.label(target))
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| ForecastError::training(target, "training row without a label"))?;

        let scaler = ScalerArtifact::fit(&x).map_err(fail)?;
        let x = scaler.transform_all(&x);

        let (train_idx, test_idx) = train_test_split(x.len(), TEST_FRACTION, SPLIT_SEED).map_err(fail)?;
        let pick = |idx: &[usize]| -> (Vec<FeatureVector>, Vec<f64>) {
            (idx.iter().map(|&i| x[i]).collect(), idx.iter().map(|&i| y[i]).collect())
        };
        let (train_x, train_y) = pick(&train_idx);
        let (test_x, test_y) = pick(&test_idx);

        let search = grid_search(&train_x, &train_y, &hyperparameter_grid(), CV_FOLDS).map_err(fail)?;
        for candidate in &search.candidates {
            self.reporter.report(Event::CandidateScored {
                target,
                hyperparameters: candidate.hyperparameters,
                cv_mse: candidate.cv_mse,
            });
        }
        let best = search.best;
        self.reporter.report(Event::ModelSelected {
            target,
            hyperparameters: best.hyperparameters,
            cv_mse: best.cv_mse,
        });

        let tree = RegressionTree::fit(&train_x, &train_y, best.hyperparameters).map_err(fail)?;
        let metrics = EvaluationMetrics::compute(&test_y, &tree.predict_all(&test_x));
        if !metrics.is_finite() {
            return Err(ForecastError::training(target, "evaluation produced non-finite metrics"));
        }
        self.reporter.report(Event::Evaluated { target, metrics });

        let report = TrainingReport {
            target,
            hyperparameters: best.hyperparameters,
            cv_mse: best.cv_mse,
            metrics,
            train_rows: train_x.len(),
            test_rows: test_x.len(),
        };
        let artifacts = TargetArtifacts {
            schema_version: SCHEMA_VERSION,
            target,
            trained_at: self.clock.now(),
            scaler,
            model: ModelArtifact {
                hyperparameters: best.hyperparameters,
                tree,
            },
            metrics,
        };
        Ok((artifacts, report))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::features::FixedClock;
    use crate::reporter::{MemoryReporter, NullReporter};
    use crate::store::InMemoryModelStore;
    use chrono::{TimeZone, Utc};

    fn clock() -> FixedClock {
        FixedClock::utc(Utc.with_ymd_and_hms(2025, 3, 26, 12, 0, 0).unwrap())
    }

    fn table(n: usize) -> Vec<FeatureRow> {
        // ---
        (0..n)
            .map(|i| {
                let t = 20.0 + 0.1 * i as f64;
                let h = 50.0 + 0.3 * (i % 17) as f64;
                FeatureRow {
                    time_of_day: (i / 12 % 4) as u8,
                    temp_lag_1: t - 0.1,
                    temp_lag_2: t - 0.2,
                    humid_lag_1: h - 0.3,
                    humid_lag_2: h - 0.6,
                    temperature: Some(t),
                    humidity: Some(h),
                }
            })
            .collect()
    }

    #[test]
    fn test_grid_order() {
        // ---
        let grid = hyperparameter_grid();
        assert_eq!(grid.len(), 16);
        assert_eq!(
            grid[0],
            Hyperparameters {
                max_depth: 4,
                min_samples_leaf: 5
            }
        );
        assert_eq!(
            grid[1],
            Hyperparameters {
                max_depth: 4,
                min_samples_leaf: 10
            }
        );
        assert_eq!(
            grid[15],
            Hyperparameters {
                max_depth: 10,
                min_samples_leaf: 30
            }
        );
    }

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        // ---
        let (train_a, test_a) = train_test_split(50, TEST_FRACTION, SPLIT_SEED).unwrap();
        let (train_b, test_b) = train_test_split(50, TEST_FRACTION, SPLIT_SEED).unwrap();

        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 10);
        assert_eq!(train_a.len(), 40);

        let mut all: Vec<usize> = train_a.iter().chain(&test_a).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_rounds_test_size_up() {
        // ---
        let (train, test) = train_test_split(8, TEST_FRACTION, SPLIT_SEED).unwrap();
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 6);
        assert!(train_test_split(1, TEST_FRACTION, SPLIT_SEED).is_err());
    }

    #[test]
    fn test_k_fold_sizes() {
        // ---
        let folds = k_fold(12, 5).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|(_, v)| v.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2, 2]);
        assert_eq!(folds[0].1, vec![0, 1, 2]);
        assert_eq!(folds[1].0.len(), 9);
        assert!(!folds[1].0.contains(&3));

        assert_eq!(
            k_fold(4, 5),
            Err(FitError::NotEnoughSamples {
                required: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        // ---
        // Constant target: every candidate scores zero.
        let x: Vec<FeatureVector> = (0..40).map(|i| [0.0, i as f64, 0.0, 0.0, 0.0]).collect();
        let y = vec![21.0; 40];

        let outcome = grid_search(&x, &y, &hyperparameter_grid(), CV_FOLDS).unwrap();
        assert_eq!(outcome.candidates.len(), 16);
        assert_eq!(outcome.best.cv_mse, 0.0);
        assert_eq!(outcome.best.hyperparameters, hyperparameter_grid()[0]);
    }

    #[test]
    fn test_lower_score_wins() {
        // ---
        // Every fold sees all four x values; 5-sample leaves can split the
        // table, 30-sample leaves cannot split 48 fitting rows.
        let x: Vec<FeatureVector> = (0..60).map(|i| [0.0, (i % 4) as f64, 0.0, 0.0, 0.0]).collect();
        let y: Vec<f64> = (0..60).map(|i| if i % 4 < 2 { 10.0 } else { 30.0 }).collect();
        let grid = [
            Hyperparameters {
                max_depth: 4,
                min_samples_leaf: 30,
            },
            Hyperparameters {
                max_depth: 4,
                min_samples_leaf: 5,
            },
        ];

        let outcome = grid_search(&x, &y, &grid, CV_FOLDS).unwrap();
        assert_eq!(outcome.best.hyperparameters, grid[1]);
        assert_eq!(outcome.candidates[1].cv_mse, 0.0);
        assert!(outcome.candidates[0].cv_mse > 50.0);
    }

    #[test]
    fn test_metrics() {
        // ---
        let metrics = EvaluationMetrics::compute(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 6.0]);
        assert_eq!(metrics.mse, 1.0);
        assert_eq!(metrics.mae, 0.5);
        assert_eq!(metrics.r2, 1.0 - 4.0 / 5.0);

        let flat = EvaluationMetrics::compute(&[2.0, 2.0], &[2.0, 2.0]);
        assert_eq!(flat.r2, 1.0);
        let flat = EvaluationMetrics::compute(&[2.0, 2.0], &[2.0, 3.0]);
        assert_eq!(flat.r2, 0.0);
        assert!(flat.is_finite());
    }

    #[test]
    fn test_train_target_saves_artifacts() {
        // ---
        let mut store = InMemoryModelStore::new();
        let reporter = MemoryReporter::new();
        let clock = clock();
        let rows = table(60);

        let report = Trainer::new(&mut store, &reporter, &clock)
            .train_target(&rows, SensorKind::Temperature)
            .unwrap();

        assert_eq!(report.test_rows, 12);
        assert_eq!(report.train_rows, 48);
        assert!(report.metrics.is_finite());
        assert!(MAX_DEPTH_GRID.contains(&report.hyperparameters.max_depth));

        let saved = store.load(SensorKind::Temperature).unwrap();
        assert_eq!(saved.model.hyperparameters, report.hyperparameters);
        assert_eq!(saved.trained_at, clock.now());
        assert!(!store.contains(SensorKind::Humidity));

        let events = reporter.events();
        let scored = events
            .iter()
            .filter(|e| matches!(e, Event::CandidateScored { .. }))
            .count();
        assert_eq!(scored, 16);
        assert!(events.contains(&Event::ArtifactsSaved {
            target: SensorKind::Temperature
        }));
    }

    #[test]
    fn test_training_is_reproducible() {
        // ---
        let rows = table(60);
        let clock = clock();
        let mut first = InMemoryModelStore::new();
        let mut second = InMemoryModelStore::new();

        Trainer::new(&mut first, &NullReporter, &clock).train_all(
            &rows
                .iter()
                .map(|&features| TrainingRow {
                    timestamp: clock.now(),
                    features,
                })
                .collect::<Vec<_>>(),
        );
        Trainer::new(&mut second, &NullReporter, &clock)
            .train_target(&rows, SensorKind::Temperature)
            .unwrap();

        assert_eq!(
            first.load(SensorKind::Temperature).unwrap(),
            second.load(SensorKind::Temperature).unwrap()
        );
    }

    #[test]
    fn test_failure_of_one_target_does_not_block_the_other() {
        // ---
        let mut rows: Vec<TrainingRow> = table(60)
            .into_iter()
            .map(|features| TrainingRow {
                timestamp: clock().now(),
                features,
            })
            .collect();
        for row in &mut rows {
            row.features.humidity = Some(f64::NAN);
        }
        let mut store = InMemoryModelStore::new();
        let reporter = MemoryReporter::new();
        let clock = clock();

        let run = Trainer::new(&mut store, &reporter, &clock).train_all(&rows);

        assert!(run.temperature.is_ok());
        assert!(matches!(
            run.humidity,
            Err(ForecastError::Training {
                target: SensorKind::Humidity,
                ..
            })
        ));
        assert!(!run.is_complete());
        assert!(store.contains(SensorKind::Temperature));
        assert!(!store.contains(SensorKind::Humidity));
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, Event::TrainingFailed { target: SensorKind::Humidity, .. })));
    }

    #[test]
    fn test_empty_table_is_a_training_error() {
        // ---
        let mut store = InMemoryModelStore::new();
        let clock = clock();
        let result = Trainer::new(&mut store, &NullReporter, &clock).train_target(&[], SensorKind::Humidity);

        assert!(matches!(
            result,
            Err(ForecastError::Training {
                target: SensorKind::Humidity,
                ..
            })
        ));
    }

    #[test]
    fn test_too_small_for_cross_validation() {
        // ---
        // 6 rows: 2 held out, 4 left for 5 folds.
        let mut store = InMemoryModelStore::new();
        let clock = clock();
        let result = Trainer::new(&mut store, &NullReporter, &clock)
            .train_target(&table(6), SensorKind::Temperature);

        assert!(matches!(result, Err(ForecastError::Training { .. })));
        assert!(!store.contains(SensorKind::Temperature));
    }
}
