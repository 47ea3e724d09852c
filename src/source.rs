//! Raw reading source backed by the smart-home PostgreSQL database.
//!
//! One physical sensor per kind is used: the first row of `sensor` with the
//! matching `sensor_type`. Values are stored as text and parsed here, so a
//! malformed value surfaces as an alignment error for the whole batch.
//!
//! `recorded_time` may be a naive wall-clock column. The `::timestamptz` cast
//! reads it in the session time zone, which the pool sets to the configured
//! local offset on connect.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{RawReading, RawSensorRow, SensorKind};

// ---

/// Every reading of the chosen sensor, oldest first.
pub async fn fetch_stream(pool: &PgPool, kind: SensorKind) -> Result<Vec<RawReading>> {
    // ---
    let rows: Vec<RawSensorRow> = sqlx::query_as(
        r#"
        SELECT svalue::text AS svalue, recorded_time::timestamptz AS recorded_time
        FROM sensor_data
        WHERE sensor_id = (
            SELECT sensor_id FROM sensor WHERE sensor_type = $1 LIMIT 1
        )
        ORDER BY recorded_time
        "#,
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to fetch {kind} readings"))?;

    tracing::debug!(%kind, rows = rows.len(), "Fetched sensor stream");
    parse_rows(&rows)
}

/// The `limit` most recent readings of the chosen sensor, oldest first.
pub async fn fetch_recent(pool: &PgPool, kind: SensorKind, limit: i64) -> Result<Vec<RawReading>> {
    // ---
    let mut rows: Vec<RawSensorRow> = sqlx::query_as(
        r#"
        SELECT svalue::text AS svalue, recorded_time::timestamptz AS recorded_time
        FROM sensor_data
        WHERE sensor_id = (
            SELECT sensor_id FROM sensor WHERE sensor_type = $1 LIMIT 1
        )
        ORDER BY recorded_time DESC
        LIMIT $2
        "#,
    )
    .bind(kind.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("Failed to fetch recent {kind} readings"))?;

    rows.reverse();
    parse_rows(&rows)
}

fn parse_rows(rows: &[RawSensorRow]) -> Result<Vec<RawReading>> {
    // ---
    let readings = rows
        .iter()
        .map(RawSensorRow::parse)
        .collect::<crate::error::Result<Vec<_>>>()?;
    Ok(readings)
}
