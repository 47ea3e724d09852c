//! Sensor Aligner: merges the temperature and humidity streams onto one
//! regular 5-minute grid.
//!
//! Steps, in order:
//! 1. sort each stream by time and drop repeated timestamps (first wins)
//! 2. bucket each stream onto the grid, averaging samples in a bucket
//! 3. outer-join the two bucketed streams over one contiguous grid
//! 4. linearly interpolate gaps in both columns after the join
//! 5. collapse runs of identical (temperature, humidity) pairs to 2 rows
//!
//! Any malformed sample rejects the whole batch; there is no partial result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{ForecastError, Result};
use crate::models::{AlignedRecord, RawReading, SensorKind};
use crate::reporter::{Event, Reporter};

// ---

/// Grid spacing in seconds (5 minutes).
pub const GRID_SECONDS: i64 = 5 * 60;

/// Fewest aligned rows accepted for training.
pub const MIN_ALIGNED_ROWS: usize = 10;

/// Longest run of identical consecutive readings kept; the rest of a run is
/// treated as a stuck sensor.
pub const MAX_IDENTICAL_RUN: usize = 2;

/// Align two raw streams. See the module docs for the exact policy.
pub fn align(
    temperature: &[RawReading],
    humidity: &[RawReading],
    reporter: &dyn Reporter,
) -> Result<Vec<AlignedRecord>> {
    // ---
    let (temperature, temp_dupes) = deduplicate(SensorKind::Temperature, temperature)?;
    let (humidity, humid_dupes) = deduplicate(SensorKind::Humidity, humidity)?;

    // A stream with no readings at all cannot be interpolated into anything.
    if temperature.is_empty() || humidity.is_empty() {
        return Err(ForecastError::InsufficientData {
            required: MIN_ALIGNED_ROWS,
            actual: 0,
        });
    }

    let temp_buckets = resample(&temperature);
    let humid_buckets = resample(&humidity);

    let first = temp_buckets.keys().chain(humid_buckets.keys()).min().copied();
    let last = temp_buckets.keys().chain(humid_buckets.keys()).max().copied();
    let (first, last) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(ForecastError::InsufficientData {
                required: MIN_ALIGNED_ROWS,
                actual: 0,
            })
        }
    };

    let grid: Vec<i64> = (first..=last).step_by(GRID_SECONDS as usize).collect();
    let mut temp_column: Vec<Option<f64>> = grid.iter().map(|b| temp_buckets.get(b).copied()).collect();
    let mut humid_column: Vec<Option<f64>> = grid.iter().map(|b| humid_buckets.get(b).copied()).collect();

    interpolate(&mut temp_column);
    interpolate(&mut humid_column);

    let mut records = Vec::with_capacity(grid.len());
    for ((bucket, temperature), humidity) in grid.iter().zip(temp_column).zip(humid_column) {
        let timestamp = DateTime::<Utc>::from_timestamp(*bucket, 0).ok_or_else(|| {
            ForecastError::Alignment(format!("grid timestamp {bucket} is out of range"))
        })?;
        records.push(AlignedRecord {
            timestamp,
            temperature,
            humidity,
        });
    }

    let grid_rows = records.len();
    let records = suppress_stale(records);
    let stale_rows_dropped = grid_rows - records.len();

    reporter.report(Event::Aligned {
        temperature_samples: temperature.len(),
        humidity_samples: humidity.len(),
        duplicates_dropped: temp_dupes + humid_dupes,
        grid_rows,
        stale_rows_dropped,
    });

    if records.len() < MIN_ALIGNED_ROWS {
        return Err(ForecastError::InsufficientData {
            required: MIN_ALIGNED_ROWS,
            actual: records.len(),
        });
    }

    Ok(records)
}

/// Validate, sort and drop repeated timestamps. Returns the cleaned stream and
/// the number of duplicates removed.
fn deduplicate(kind: SensorKind, stream: &[RawReading]) -> Result<(Vec<RawReading>, usize)> {
    // ---
    if let Some(bad) = stream.iter().find(|r| !r.value.is_finite()) {
        return Err(ForecastError::Alignment(format!(
            "non-finite {kind} value {} at {}",
            bad.value, bad.timestamp
        )));
    }

    let mut cleaned = stream.to_vec();
    // Stable sort keeps the original order among equal timestamps.
    cleaned.sort_by_key(|r| r.timestamp);
    let before = cleaned.len();
    cleaned.dedup_by_key(|r| r.timestamp);

    let removed = before - cleaned.len();
    Ok((cleaned, removed))
}

/// Mean value per grid bucket, keyed by the bucket start in epoch seconds.
fn resample(stream: &[RawReading]) -> BTreeMap<i64, f64> {
    // ---
    let mut sums: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for reading in stream {
        let bucket = reading.timestamp.timestamp().div_euclid(GRID_SECONDS) * GRID_SECONDS;
        let entry = sums.entry(bucket).or_insert((0.0, 0));
        entry.0 += reading.value;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(bucket, (sum, count))| (bucket, sum / count as f64))
        .collect()
}

/// Fill gaps in place: linear between known points, last value carried past
/// the final known point, leading gaps left empty.
fn interpolate(column: &mut [Option<f64>]) {
    // ---
    let known: Vec<usize> = column
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|_| i))
        .collect();

    for pair in known.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi - lo < 2 {
            continue;
        }
        if let (Some(a), Some(b)) = (column[lo], column[hi]) {
            let span = (hi - lo) as f64;
            for i in lo + 1..hi {
                let t = (i - lo) as f64 / span;
                column[i] = Some(a + (b - a) * t);
            }
        }
    }

    if let Some(&last) = known.last() {
        let value = column[last];
        for slot in column.iter_mut().skip(last + 1) {
            *slot = value;
        }
    }
}

/// Keep at most [`MAX_IDENTICAL_RUN`] rows of any run of identical
/// consecutive (temperature, humidity) pairs.
fn suppress_stale(records: Vec<AlignedRecord>) -> Vec<AlignedRecord> {
    // ---
    let mut kept: Vec<AlignedRecord> = Vec::with_capacity(records.len());
    let mut run = 0usize;
    let mut previous: Option<(Option<f64>, Option<f64>)> = None;

    for record in records {
        let pair = (record.temperature, record.humidity);
        run = if previous == Some(pair) { run + 1 } else { 1 };
        previous = Some(pair);

        if run <= MAX_IDENTICAL_RUN {
            kept.push(record);
        }
    }

    kept
}
