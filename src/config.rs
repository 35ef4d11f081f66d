//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.avd-rollup.toml` files. The resulting [`Config`] is built once at the
//! call boundary and passed down explicitly; nothing below `main` reads the
//! environment.

use crate::cli::SinkKind;
use crate::models::{RollupKind, MAX_LOOKBACK_HOURS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".avd-rollup.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data sink connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Rollup query settings.
    #[serde(default)]
    pub rollup: RollupConfig,

    /// Report sink settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Relational engine behind the data sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// MySQL / Azure Database for MySQL (default)
    #[default]
    Mysql,
    /// Local SQLite file (development and tests)
    Sqlite,
}

/// Data sink connection settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    /// Placeholder by default; supply the real secret via `DB_PASS`.
    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_database")]
    pub name: String,

    /// Require TLS on the MySQL connection.
    #[serde(default)]
    pub tls: bool,

    /// CA bundle used to verify the server certificate when TLS is on.
    #[serde(default)]
    pub tls_ca: Option<PathBuf>,

    /// Database file for the SQLite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: default_password(),
            name: default_database(),
            tls: false,
            tls_ca: None,
            path: None,
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("tls", &self.tls)
            .field("tls_ca", &self.tls_ca)
            .field("path", &self.path)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .finish()
    }
}

impl DatabaseConfig {
    /// Location string for logs and errors. Never includes the password.
    pub fn target(&self) -> String {
        match self.backend {
            Backend::Mysql => format!("mysql://{}@{}:{}/{}", self.user, self.host, self.port, self.name),
            Backend::Sqlite => format!(
                "sqlite://{}",
                self.path
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_user() -> String {
    "avd_user".to_string()
}

fn default_password() -> String {
    "change_me".to_string()
}

fn default_database() -> String {
    "avd_ops".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

/// Rollup query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Rollup to run when none is given on the command line.
    #[serde(default)]
    pub kind: RollupKind,

    /// Maximum records returned.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum failures for a user to appear in the mount-failures rollup.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: i64,

    /// Heartbeat age after which an Active session counts as orphaned.
    #[serde(default = "default_staleness_minutes")]
    pub staleness_minutes: u32,

    /// Restrict the query to the last N hours. Unbounded when unset.
    #[serde(default)]
    pub lookback_hours: Option<u32>,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            kind: RollupKind::default(),
            limit: default_limit(),
            failure_threshold: default_failure_threshold(),
            staleness_minutes: default_staleness_minutes(),
            lookback_hours: None,
            query_timeout_seconds: default_query_timeout(),
        }
    }
}

fn default_limit() -> usize {
    10
}

fn default_failure_threshold() -> i64 {
    3
}

fn default_staleness_minutes() -> u32 {
    60
}

fn default_query_timeout() -> u64 {
    30
}

/// Report sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Where records are delivered.
    #[serde(default)]
    pub sink: SinkKind,

    /// Output file for file sinks. Defaults to `avd_rollup.<ext>`.
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Endpoint for the webhook sink.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_seconds: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::default(),
            output: None,
            webhook_url: None,
            webhook_timeout_seconds: default_webhook_timeout(),
        }
    }
}

fn default_webhook_timeout() -> u64 {
    15
}

impl ReportConfig {
    /// Output path for file sinks, falling back to a per-format default.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let ext = match self.sink {
                SinkKind::Json => "json",
                SinkKind::Csv => "csv",
                SinkKind::Markdown => "md",
                SinkKind::Console | SinkKind::Webhook => "txt",
            };
            PathBuf::from(format!("avd_rollup.{}", ext))
        })
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments (and the environment variables clap reads for them)
    /// take precedence. Only explicitly provided values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        let db = &mut self.database;
        if let Some(backend) = args.db_backend {
            db.backend = backend;
        }
        if let Some(ref host) = args.db_host {
            db.host = host.clone();
        }
        if let Some(port) = args.db_port {
            db.port = port;
        }
        if let Some(ref user) = args.db_user {
            db.user = user.clone();
        }
        if let Some(ref password) = args.db_pass {
            db.password = password.clone();
        }
        if let Some(ref name) = args.db_name {
            db.name = name.clone();
        }
        if args.db_tls {
            db.tls = true;
        }
        if let Some(ref ca) = args.db_tls_ca {
            db.tls_ca = Some(ca.clone());
        }
        if let Some(ref path) = args.db_path {
            db.path = Some(path.clone());
        }
        if let Some(timeout) = args.connect_timeout {
            db.connect_timeout_seconds = timeout;
        }

        let rollup = &mut self.rollup;
        if let Some(kind) = args.kind {
            rollup.kind = kind;
        }
        if let Some(limit) = args.limit {
            rollup.limit = limit;
        }
        if let Some(threshold) = args.failure_threshold {
            rollup.failure_threshold = threshold;
        }
        if let Some(minutes) = args.staleness_minutes {
            rollup.staleness_minutes = minutes;
        }
        if let Some(hours) = args.lookback_hours {
            rollup.lookback_hours = Some(hours);
        }
        if let Some(timeout) = args.timeout {
            rollup.query_timeout_seconds = timeout;
        }

        if let Some(sink) = args.sink {
            self.report.sink = sink;
        }
        if let Some(ref output) = args.output {
            self.report.output = Some(output.clone());
        }
        if let Some(ref url) = args.webhook_url {
            self.report.webhook_url = Some(url.clone());
        }
    }

    /// Check settings that can only be judged after merging.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.backend == Backend::Sqlite && self.database.path.is_none() {
            return Err("SQLite backend requires a database path (--db-path or DB_PATH)".to_string());
        }
        if self.rollup.limit == 0 {
            return Err("Limit must be at least 1".to_string());
        }
        if self.rollup.query_timeout_seconds == 0 {
            return Err("Query timeout must be at least 1 second".to_string());
        }
        if let Some(hours) = self.rollup.lookback_hours {
            if hours == 0 || hours > MAX_LOOKBACK_HOURS {
                return Err(format!(
                    "Lookback must be between 1 and {} hours",
                    MAX_LOOKBACK_HOURS
                ));
            }
        }
        if self.report.sink == SinkKind::Webhook {
            match self.report.webhook_url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(_) => return Err("Webhook URL must start with 'http://' or 'https://'".to_string()),
                None => return Err("Webhook sink requires --webhook-url".to_string()),
            }
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.backend, Backend::Mysql);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.name, "avd_ops");
        assert_eq!(config.rollup.kind, RollupKind::PeakConcurrency);
        assert_eq!(config.rollup.limit, 10);
        assert_eq!(config.rollup.failure_threshold, 3);
        assert!(config.rollup.lookback_hours.is_none());
        assert_eq!(config.report.sink, SinkKind::Console);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[database]
backend = "sqlite"
path = "/var/lib/avd/ops.db"

[rollup]
kind = "mount-failures"
limit = 25
lookback_hours = 24

[report]
sink = "json"
output = "mounts.json"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.database.backend, Backend::Sqlite);
        assert_eq!(
            config.database.path,
            Some(PathBuf::from("/var/lib/avd/ops.db"))
        );
        assert_eq!(config.database.user, "avd_user");
        assert_eq!(config.rollup.kind, RollupKind::MountFailures);
        assert_eq!(config.rollup.limit, 25);
        assert_eq!(config.rollup.lookback_hours, Some(24));
        assert_eq!(config.report.sink, SinkKind::Json);
        assert_eq!(config.report.output_path(), PathBuf::from("mounts.json"));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[rollup]"));
        assert!(toml_str.contains("[report]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.rollup.limit, 10);
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut db = DatabaseConfig::default();
        db.password = "s3cr3t".to_string();
        let debug = format!("{:?}", db);
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
        assert!(!db.target().contains("s3cr3t"));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.database.backend = Backend::Sqlite;
        assert!(config.validate().is_err());
        config.database.path = Some(PathBuf::from("ops.db"));
        assert!(config.validate().is_ok());

        config.report.sink = SinkKind::Webhook;
        assert!(config.validate().is_err());
        config.report.webhook_url = Some("https://hooks.example.com/rollup".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_lookback_range() {
        let mut config: Config =
            toml::from_str("[rollup]\nlookback_hours = 4294967295\n").unwrap();
        assert!(config.validate().is_err());

        config.rollup.lookback_hours = Some(0);
        assert!(config.validate().is_err());

        config.rollup.lookback_hours = Some(MAX_LOOKBACK_HOURS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_output_path() {
        let mut report = ReportConfig::default();
        report.sink = SinkKind::Csv;
        assert_eq!(report.output_path(), PathBuf::from("avd_rollup.csv"));
    }
}
