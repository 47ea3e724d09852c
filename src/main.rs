//! Application entry point for the `yolohome-forecast` service.
//!
//! Three subcommands share one startup sequence:
//! - `serve`   – HTTP service with `/predict`, `/observations`, `/train`, `/health`
//! - `train`   – offline retraining from the sensor database
//! - `predict` – one JSON request on stdin, one JSON forecast on stdout
//!
//! # Environment Variables
//! - `DATABASE_URL` (optional) – PostgreSQL connection string, required by `train`
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `MODEL_DIR` (optional) – artifact directory (default: `models`)
//! - `BIND_ADDR` (optional) – listen address for `serve` (default: `0.0.0.0:8080`)
//! - `TZ_OFFSET_HOURS` (optional) – local wall clock offset from UTC (default: 0)
//! - `FORECAST_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `FORECAST_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! Logs go to stderr so `predict` output on stdout stays machine-readable.
use std::{env, fs, io::Read, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::{postgres::PgPoolOptions, Executor, PgPool};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use yolohome_forecast::routes::{self, AppState};
use yolohome_forecast::{
    aligner, config, features, source, Clock, Config, FileModelStore, ForecastError, ModelStore,
    PredictionEngine, SensorKind, SystemClock, Trainer, TracingReporter,
};

/// File name of the optional preprocessed-data export inside `MODEL_DIR`.
const EXPORT_FILE: &str = "sensor_data_preprocessed.csv";

#[derive(Parser)]
#[command(name = "yolohome-forecast")]
#[command(about = "Five-minute climate forecasts and fan decisions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve predictions over HTTP
    Serve,

    /// Retrain both models from the sensor database
    Train {
        /// Also write the training table to MODEL_DIR as CSV
        #[arg(long)]
        export_csv: bool,
    },

    /// Read one prediction request (JSON) from stdin
    Predict,
}

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_from_env()?;
    cfg.log_config();

    match cli.command {
        Commands::Serve => serve(&cfg).await,
        Commands::Train { export_csv } => train(&cfg, export_csv).await,
        Commands::Predict => predict(&cfg),
    }
}

async fn connect(cfg: &Config) -> Result<PgPool> {
    // ---
    let db_url = cfg.require_db_url()?;
    tracing::info!("Attempting to connect to database: {}", cfg.masked_db_url());

    // Session zone = home wall clock, so naive `recorded_time` values cast to
    // timestamptz as local time.
    let set_zone = format!("SET TIME ZONE INTERVAL '{}' HOUR TO MINUTE", cfg.tz_offset);

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .after_connect(move |conn, _meta| {
            let set_zone = set_zone.clone();
            Box::pin(async move {
                conn.execute(set_zone.as_str()).await?;
                Ok(())
            })
        })
        .connect(db_url)
        .await
        .map_err(|e| {
            anyhow::anyhow!("Failed to connect to database '{}': {}", cfg.masked_db_url(), e)
        })?;

    tracing::info!("Successfully connected to database");
    Ok(pool)
}

async fn serve(cfg: &Config) -> Result<()> {
    // ---
    let pool = match cfg.db_url {
        Some(_) => Some(connect(cfg).await?),
        None => {
            tracing::warn!("DATABASE_URL not set; /train and cache seeding are disabled");
            None
        }
    };

    let store = FileModelStore::new(&cfg.model_dir);
    for kind in SensorKind::ALL {
        if !store.contains(kind) {
            tracing::warn!(
                "No {} model at {}; predictions will fail until training has run",
                kind,
                store.path_for(kind).display()
            );
        }
    }

    let state = AppState::new(
        Box::new(store),
        pool,
        Arc::new(SystemClock::new(cfg.tz_offset)),
        Arc::new(TracingReporter),
    );
    let app = routes::router(state);

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn train(cfg: &Config, export_csv: bool) -> Result<()> {
    // ---
    let pool = connect(cfg).await?;
    let temperature = source::fetch_stream(&pool, SensorKind::Temperature).await?;
    let humidity = source::fetch_stream(&pool, SensorKind::Humidity).await?;

    let reporter = TracingReporter;
    let records = aligner::align(&temperature, &humidity, &reporter)?;
    let clock = SystemClock::new(cfg.tz_offset);
    let rows = features::derive_training_rows(&records, clock.offset(), &reporter);

    if export_csv {
        fs::create_dir_all(&cfg.model_dir)
            .with_context(|| format!("Failed to create {}", cfg.model_dir.display()))?;
        let path = cfg.model_dir.join(EXPORT_FILE);
        let file = fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        features::write_csv(&rows, std::io::BufWriter::new(file))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Exported {} rows to {}", rows.len(), path.display());
    }

    let mut store = FileModelStore::new(&cfg.model_dir);
    let run = Trainer::new(&mut store, &reporter, &clock).train_all(&rows);

    let mut failed = Vec::new();
    for kind in SensorKind::ALL {
        match run.outcome(kind) {
            Ok(report) => tracing::info!(
                "{}: max_depth={} min_samples_leaf={} mse={:.4} mae={:.4} r2={:.4}",
                kind,
                report.hyperparameters.max_depth,
                report.hyperparameters.min_samples_leaf,
                report.metrics.mse,
                report.metrics.mae,
                report.metrics.r2
            ),
            Err(e) => failed.push(e.to_string()),
        }
    }

    if !failed.is_empty() {
        bail!("Training incomplete: {}", failed.join("; "));
    }
    Ok(())
}

fn predict(cfg: &Config) -> Result<()> {
    // ---
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read request from stdin")?;
    let body: serde_json::Value = serde_json::from_str(&input)
        .map_err(|e| ForecastError::InvalidInput(format!("request is not valid JSON: {e}")))?;

    let mut engine = PredictionEngine::new(
        FileModelStore::new(&cfg.model_dir),
        Arc::new(SystemClock::new(cfg.tz_offset)),
        Arc::new(TracingReporter),
    );
    let result = engine.predict_json(&body)?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Output on stderr
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY on stderr
/// - Span event emission mode controlled by the `FORECAST_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else `FORECAST_LOG_LEVEL`
fn init_tracing() {
    // ---
    let span_events = match env::var("FORECAST_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stderr().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("FORECAST_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
