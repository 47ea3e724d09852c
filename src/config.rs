//! Configuration loader for the `yolohome-forecast` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). The forecasting constants themselves (threshold,
//! bands, search grid) are fixed in the code and are not configurable.
//!
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::FixedOffset;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional signed integer environment variable with a default value.
macro_rules! parse_env_i32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<i32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional socket address environment variable with a default value.
macro_rules! parse_env_addr {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<SocketAddr>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or_else(|| SocketAddr::from($default))
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string. Only the training path and the live
    /// cache fallback need it.
    pub db_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Directory holding one JSON artifact per target.
    pub model_dir: PathBuf,

    /// HTTP listen address for `serve`.
    pub bind_addr: SocketAddr,

    /// Offset of the home's wall clock. Time-of-day features and naive
    /// database timestamps are read in this zone.
    pub tz_offset: FixedOffset,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `DATABASE_URL` – PostgreSQL connection string
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `MODEL_DIR` – artifact directory (default: `models`)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `TZ_OFFSET_HOURS` – local wall clock offset from UTC (default: 0)
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let model_dir = env::var("MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("models"));
    let bind_addr = parse_env_addr!("BIND_ADDR", ([0, 0, 0, 0], 8080));
    let tz_offset = offset_from_hours(parse_env_i32!("TZ_OFFSET_HOURS", 0))?;

    Ok(Config {
        db_url,
        db_pool_max,
        model_dir,
        bind_addr,
        tz_offset,
    })
}

/// Whole-hour UTC offset, rejecting anything outside -23..=23.
fn offset_from_hours(hours: i32) -> Result<FixedOffset> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow!("Invalid TZ_OFFSET_HOURS: {} is out of range", hours))
}

impl Config {
    /// The database URL, or an error naming the missing variable.
    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL must be set in .env or environment"))
    }

    /// Database URL with the password replaced by `****`.
    pub fn masked_db_url(&self) -> String {
        // ---
        let Some(db_url) = self.db_url.as_deref() else {
            return "<unset>".to_string();
        };

        if let Some(at_pos) = db_url.rfind('@') {
            if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
        db_url.to_string()
    }

    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL : {}", self.masked_db_url());
        tracing::info!("  DB_POOL_MAX  : {}", self.db_pool_max);
        tracing::info!("  MODEL_DIR    : {}", self.model_dir.display());
        tracing::info!("  BIND_ADDR    : {}", self.bind_addr);
        tracing::info!("  TZ_OFFSET    : {}", self.tz_offset);
    }
}
