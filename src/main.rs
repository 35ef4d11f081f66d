//! avd-rollup - operational rollups for Azure Virtual Desktop telemetry
//!
//! A CLI job that connects to the session telemetry database, runs one
//! read-only aggregation and delivers the top rows to a report sink.
//!
//! Exit codes:
//!   0 - Success (an empty result is still a success)
//!   1 - Configuration or connection error
//!   2 - Query error, including timeout and cancellation
//!   3 - Report sink error

mod cli;
mod config;
mod db;
mod error;
mod models;
mod report;
mod rollup;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use db::Connector;
use error::{ConnectionError, JobError, SinkError};
use indicatif::{ProgressBar, ProgressStyle};
use models::TimeWindow;
use rollup::{RollupJob, RollupRequest};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const EXIT_CONNECTION: i32 = 1;
const EXIT_QUERY: i32 = 2;
const EXIT_SINK: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_CONNECTION);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("avd-rollup v{}", env!("CARGO_PKG_VERSION"));

    match run_rollup_job(&args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let code = exit_code(&e);
            error!("Rollup failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(code);
        }
    }
}

/// Handle --init-config: generate a default .avd-rollup.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(EXIT_CONNECTION);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the database connection and report sink.");
    Ok(())
}

/// Initialize logging based on verbosity settings. `RUST_LOG` overrides.
fn init_logging(args: &Args) {
    let level = args.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run one rollup end to end: config, query, report.
async fn run_rollup_job(args: &Args) -> Result<()> {
    let start_time = Instant::now();

    let mut config = load_config(args)?;
    config.merge_with_args(args);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    debug!("Configuration: {:?}", config);

    // Fixed once so staleness and lookback agree for the whole run.
    let as_of = Utc::now().naive_utc();
    let window = TimeWindow {
        since: args.since,
        until: args.until,
    };
    let request = RollupRequest::from_config(&config.rollup, window, as_of)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    if request.window.is_unbounded() {
        debug!("No time window set, aggregating all history");
    }

    // A sink that cannot be built fails the run before any query.
    let mut sink = report::build_sink(&config.report)?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling rollup");
                cancel.cancel();
            }
        })
    };

    let job = RollupJob::new(
        Connector::new(config.database.clone()),
        Duration::from_secs(config.rollup.query_timeout_seconds),
    );

    if !args.quiet {
        println!("📊 Rollup: {}", request.kind.title());
        println!("   Database: {}", job.connector().target());
        println!("   Window: {}", request.window);
        println!("   Limit: {}", request.limit);
    }

    let spinner = (!args.quiet).then(|| start_spinner(format!("Running {}...", request.kind)));
    let result = job.run(&request, &cancel).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    interrupt.abort();

    let report = result?;
    if report.is_empty() {
        info!("Rollup {} matched no rows", request.kind);
    }

    report::emit(&report, sink.as_mut()).await?;

    if !args.quiet {
        println!(
            "\n✅ {} records delivered to {} in {:.1}s",
            report.records.len(),
            sink.describe(),
            start_time.elapsed().as_secs_f64()
        );
    }

    Ok(())
}

fn start_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Map a failed run onto the documented exit codes.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(job_error) = err.downcast_ref::<JobError>() {
        return match job_error {
            JobError::Connection(ConnectionError::Cancelled { .. }) => EXIT_QUERY,
            JobError::Connection(_) => EXIT_CONNECTION,
            JobError::Query(_) => EXIT_QUERY,
        };
    }
    if err.downcast_ref::<SinkError>().is_some() {
        return EXIT_SINK;
    }
    EXIT_CONNECTION
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;

    #[test]
    fn test_exit_codes() {
        let unreachable: anyhow::Error = JobError::from(ConnectionError::Unreachable {
            target: "mysql://avd_user@db:3306/avd_ops".to_string(),
            reason: "refused".to_string(),
        })
        .into();
        assert_eq!(exit_code(&unreachable), 1);

        let timeout: anyhow::Error = JobError::from(QueryError::Timeout {
            rollup: "peak-concurrency".to_string(),
            after: Duration::from_secs(30),
        })
        .into();
        assert_eq!(exit_code(&timeout), 2);

        let interrupted: anyhow::Error = JobError::from(ConnectionError::Cancelled {
            target: "sqlite://ops.db".to_string(),
        })
        .into();
        assert_eq!(exit_code(&interrupted), 2);

        let sink: anyhow::Error = SinkError::Delivery {
            url: "https://hooks.example.test".to_string(),
            reason: "HTTP 503".to_string(),
        }
        .into();
        assert_eq!(exit_code(&sink), 3);

        assert_eq!(exit_code(&anyhow::anyhow!("Invalid configuration")), 1);
    }
}
