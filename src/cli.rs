//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values. Connection settings may also
//! come from the `DB_*` environment variables, which clap reads here and
//! nowhere else.

use crate::config::Backend;
use crate::models::{RollupKind, MAX_LOOKBACK_HOURS};
use chrono::NaiveDateTime;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// avd-rollup - operational rollups for Azure Virtual Desktop telemetry
///
/// Runs one read-only aggregation against the session and event tables
/// and delivers the top rows to a report sink. With no arguments it prints
/// the ten most recent peak-concurrency buckets.
///
/// Examples:
///   avd-rollup
///   avd-rollup --kind mount-failures --lookback-hours 24
///   avd-rollup --kind version-drift --sink json --output drift.json
///   avd-rollup --db-backend sqlite --db-path ./ops.db --limit 50
///   avd-rollup --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Rollup to compute
    #[arg(short, long, value_name = "KIND")]
    pub kind: Option<RollupKind>,

    /// Maximum number of records to return (default: 10)
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub limit: Option<usize>,

    /// Only include events at or after this time (YYYY-MM-DD HH:MM:SS)
    #[arg(long, value_name = "TIME", value_parser = parse_timestamp, conflicts_with = "lookback_hours")]
    pub since: Option<NaiveDateTime>,

    /// Only include events before this time (YYYY-MM-DD HH:MM:SS)
    #[arg(long, value_name = "TIME", value_parser = parse_timestamp)]
    pub until: Option<NaiveDateTime>,

    /// Only include the last N hours of events
    #[arg(long, value_name = "HOURS")]
    pub lookback_hours: Option<u32>,

    /// Minimum mount failures per user for the mount-failures rollup
    #[arg(long, value_name = "COUNT")]
    pub failure_threshold: Option<i64>,

    /// Heartbeat age (minutes) after which an Active session counts as orphaned
    #[arg(long, value_name = "MINUTES")]
    pub staleness_minutes: Option<u32>,

    /// Query timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Connect timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Database engine
    #[arg(long, value_name = "BACKEND", env = "DB_BACKEND")]
    pub db_backend: Option<Backend>,

    /// Database host
    #[arg(long, value_name = "HOST", env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Database port
    #[arg(long, value_name = "PORT", env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Database user
    #[arg(long, value_name = "USER", env = "DB_USER")]
    pub db_user: Option<String>,

    /// Database password
    #[arg(long, value_name = "PASSWORD", env = "DB_PASS", hide_env_values = true)]
    pub db_pass: Option<String>,

    /// Database name
    #[arg(long, value_name = "NAME", env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Require TLS for the database connection
    #[arg(long, env = "DB_TLS")]
    pub db_tls: bool,

    /// CA certificate used to verify the database server
    #[arg(long, value_name = "FILE")]
    pub db_tls_ca: Option<PathBuf>,

    /// SQLite database file (sqlite backend only)
    #[arg(long, value_name = "FILE", env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Report sink
    #[arg(short, long, value_name = "SINK")]
    pub sink: Option<SinkKind>,

    /// Output file for json, csv and markdown sinks
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Endpoint for the webhook sink
    #[arg(long, value_name = "URL")]
    pub webhook_url: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .avd-rollup.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .avd-rollup.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Destination for rollup records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Print records to stdout (default)
    #[default]
    Console,
    /// JSON report file
    Json,
    /// CSV file, one row per record
    Csv,
    /// Markdown report file
    Markdown,
    /// HTTP POST of the JSON report
    Webhook,
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        })
        .map_err(|_| format!("invalid timestamp '{}', expected YYYY-MM-DD[ HH:MM:SS]", s))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.limit == Some(0) {
            return Err("Limit must be at least 1".to_string());
        }

        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since >= until {
                return Err("--since must be earlier than --until".to_string());
            }
        }

        if let Some(hours) = self.lookback_hours {
            if hours == 0 {
                return Err("Lookback must be at least 1 hour".to_string());
            }
            if hours > MAX_LOOKBACK_HOURS {
                return Err(format!(
                    "Lookback must be at most {} hours",
                    MAX_LOOKBACK_HOURS
                ));
            }
        }

        if let Some(threshold) = self.failure_threshold {
            if threshold < 1 {
                return Err("Failure threshold must be at least 1".to_string());
            }
        }

        if self.timeout == Some(0) || self.connect_timeout == Some(0) {
            return Err("Timeouts must be at least 1 second".to_string());
        }

        if let Some(ref ca) = self.db_tls_ca {
            if !ca.is_file() {
                return Err(format!("CA certificate not found: {}", ca.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args::parse_from(["avd-rollup"])
    }

    #[test]
    fn test_no_arguments_is_valid() {
        let args = make_args();
        assert!(args.validate().is_ok());
        assert!(args.kind.is_none());
        assert!(args.limit.is_none());
    }

    #[test]
    fn test_parse_rollup_options() {
        let args = Args::parse_from([
            "avd-rollup",
            "--kind",
            "mount-failures",
            "-n",
            "5",
            "--since",
            "2026-10-01",
            "--until",
            "2026-10-02 06:30:00",
            "--sink",
            "csv",
        ]);
        assert_eq!(args.kind, Some(RollupKind::MountFailures));
        assert_eq!(args.limit, Some(5));
        assert_eq!(
            args.since.unwrap().to_string(),
            "2026-10-01 00:00:00"
        );
        assert_eq!(args.until.unwrap().to_string(), "2026-10-02 06:30:00");
        assert_eq!(args.sink, Some(SinkKind::Csv));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_window() {
        let mut args = make_args();
        args.since = parse_timestamp("2026-10-02").ok();
        args.until = parse_timestamp("2026-10-01").ok();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_lookback_range() {
        let args = Args::parse_from(["avd-rollup", "--lookback-hours", "4294967295"]);
        let err = args.validate().unwrap_err();
        assert!(err.contains("at most"));

        let args = Args::parse_from(["avd-rollup", "--lookback-hours", "0"]);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.lookback_hours = Some(MAX_LOOKBACK_HOURS);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_limit() {
        let mut args = make_args();
        args.limit = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_invalid_timestamp() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
