//! Feature Deriver: time-of-day bucket plus two lags of each stream.
//!
//! Batch mode turns aligned records into labelled training rows; online mode
//! turns a single prediction request into an unlabelled row. Both must
//! produce the same 5-column layout, in [`FEATURE_COLUMNS`] order, or the
//! persisted scalers and trees will read the wrong columns.
//!
//! Time-of-day buckets use the home's wall clock, given as a fixed UTC
//! offset. Timestamps themselves stay in UTC everywhere else.

use std::io::Write;

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use serde::Serialize;

use crate::models::{AlignedRecord, PredictionRequest, SensorKind};
use crate::reporter::{Event, Reporter};

// ---

/// Number of model input columns.
pub const FEATURE_COUNT: usize = 5;

/// Column order shared by training and inference.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "time_of_day",
    "temp_lag_1",
    "temp_lag_2",
    "humid_lag_1",
    "humid_lag_2",
];

/// One model input vector.
pub type FeatureVector = [f64; FEATURE_COUNT];

/// Source of "now" for online features.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the local wall clock used for time-of-day buckets.
    fn offset(&self) -> FixedOffset {
        Utc.fix()
    }
}

/// System time, read against a fixed local offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self { now, offset }
    }

    /// Fixed instant with a UTC wall clock.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Bucket an hour of day: night 0-5, morning 6-11, afternoon 12-17,
/// evening 18-23.
pub fn time_of_day(hour: u32) -> u8 {
    // ---
    match hour {
        0..=5 => 0,
        6..=11 => 1,
        12..=17 => 2,
        _ => 3,
    }
}

/// Bucket of `at` as read on a wall clock at `offset`.
pub fn local_time_of_day(at: DateTime<Utc>, offset: FixedOffset) -> u8 {
    time_of_day(at.with_timezone(&offset).hour())
}

/// Feature row. Labels are present only on training rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureRow {
    // ---
    pub time_of_day: u8,
    pub temp_lag_1: f64,
    pub temp_lag_2: f64,
    pub humid_lag_1: f64,
    pub humid_lag_2: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl FeatureRow {
    /// Model input in [`FEATURE_COLUMNS`] order.
    pub fn vector(&self) -> FeatureVector {
        // ---
        [
            f64::from(self.time_of_day),
            self.temp_lag_1,
            self.temp_lag_2,
            self.humid_lag_1,
            self.humid_lag_2,
        ]
    }

    pub fn label(&self, target: SensorKind) -> Option<f64> {
        match target {
            SensorKind::Temperature => self.temperature,
            SensorKind::Humidity => self.humidity,
        }
    }

    /// Same row without labels, as seen at inference time.
    pub fn unlabelled(&self) -> FeatureRow {
        FeatureRow {
            temperature: None,
            humidity: None,
            ..*self
        }
    }
}

/// A training row together with the grid timestamp it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingRow {
    pub timestamp: DateTime<Utc>,
    pub features: FeatureRow,
}

/// Batch mode. Row `i` gets the values of rows `i-1` and `i-2` as lags; rows
/// with any missing lag or label are dropped, which always removes the first
/// two records.
pub fn derive_training_rows(
    records: &[AlignedRecord],
    offset: FixedOffset,
    reporter: &dyn Reporter,
) -> Vec<TrainingRow> {
    // ---
    let mut rows = Vec::with_capacity(records.len().saturating_sub(2));

    for (i, record) in records.iter().enumerate().skip(2) {
        let (lag_1, lag_2) = (&records[i - 1], &records[i - 2]);

        let values = (
            record.temperature,
            record.humidity,
            lag_1.temperature,
            lag_2.temperature,
            lag_1.humidity,
            lag_2.humidity,
        );
        if let (Some(temp), Some(humid), Some(t1), Some(t2), Some(h1), Some(h2)) = values {
            rows.push(TrainingRow {
                timestamp: record.timestamp,
                features: FeatureRow {
                    time_of_day: local_time_of_day(record.timestamp, offset),
                    temp_lag_1: t1,
                    temp_lag_2: t2,
                    humid_lag_1: h1,
                    humid_lag_2: h2,
                    temperature: Some(temp),
                    humidity: Some(humid),
                },
            });
        }
    }

    reporter.report(Event::FeaturesDerived {
        rows: rows.len(),
        dropped: records.len() - rows.len(),
    });
    rows
}

/// Online mode. The time bucket comes from `now`, not from the caller, and
/// the current/previous values become lag 1/lag 2 directly.
pub fn online_row(request: &PredictionRequest, now: DateTime<Utc>, offset: FixedOffset) -> FeatureRow {
    // ---
    FeatureRow {
        time_of_day: local_time_of_day(now, offset),
        temp_lag_1: request.current_temperature,
        temp_lag_2: request.previous_temperature,
        humid_lag_1: request.current_humidity,
        humid_lag_2: request.previous_humidity,
        temperature: None,
        humidity: None,
    }
}

/// One line of the exported training table.
#[derive(Debug, Serialize)]
struct CsvRecord {
    timestamp: DateTime<Utc>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    time_of_day: u8,
    temp_lag_1: f64,
    temp_lag_2: f64,
    humid_lag_1: f64,
    humid_lag_2: f64,
}

impl From<&TrainingRow> for CsvRecord {
    fn from(row: &TrainingRow) -> Self {
        let f = &row.features;
        Self {
            timestamp: row.timestamp,
            temperature: f.temperature,
            humidity: f.humidity,
            time_of_day: f.time_of_day,
            temp_lag_1: f.temp_lag_1,
            temp_lag_2: f.temp_lag_2,
            humid_lag_1: f.humid_lag_1,
            humid_lag_2: f.humid_lag_2,
        }
    }
}

/// Write the training table as CSV for offline inspection. The header is
/// written even when there are no rows.
pub fn write_csv<W: Write>(rows: &[TrainingRow], out: W) -> Result<(), csv::Error> {
    // ---
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);

    let header = ["timestamp", "temperature", "humidity"]
        .into_iter()
        .chain(FEATURE_COLUMNS);
    writer.write_record(header)?;

    for row in rows {
        writer.serialize(CsvRecord::from(row))?;
    }
    writer.flush()?;
    Ok(())
}
