//! Data models for the rollup job.
//!
//! This module contains the read-side shape of the three event tables,
//! the wire strings shared with the ingestion collectors, and the rollup
//! records and reports produced by the job.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Timestamp format used for rendering and for SQLite text columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lifecycle state of a desktop session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Disconnected,
    Orphaned,
}

impl SessionState {
    /// Wire string stored in `sessions.state`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "Active",
            SessionState::Disconnected => "Disconnected",
            SessionState::Orphaned => "Orphaned",
        }
    }

    /// Whether the collectors may move a session from `self` to `next`.
    ///
    /// Transitions only go forward: Active -> Disconnected -> Orphaned, or
    /// Active -> Orphaned directly. The job reads state and never enforces this.
    #[allow(dead_code)] // Documents the ingestion contract
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Active, SessionState::Disconnected)
                | (SessionState::Active, SessionState::Orphaned)
                | (SessionState::Disconnected, SessionState::Orphaned)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(SessionState::Active),
            "Disconnected" => Ok(SessionState::Disconnected),
            "Orphaned" => Ok(SessionState::Orphaned),
            other => Err(format!("unknown session state: {}", other)),
        }
    }
}

/// Outcome of a profile container mount attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MountEventKind {
    MountSuccess,
    MountFailure,
}

impl MountEventKind {
    /// Wire string stored in `mount_events.kind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MountEventKind::MountSuccess => "MountSuccess",
            MountEventKind::MountFailure => "MountFailure",
        }
    }
}

impl fmt::Display for MountEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MountEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MountSuccess" => Ok(MountEventKind::MountSuccess),
            "MountFailure" => Ok(MountEventKind::MountFailure),
            other => Err(format!("unknown mount event kind: {}", other)),
        }
    }
}

/// Result of an application launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaunchStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

impl LaunchStatus {
    /// Wire string stored in `app_launches.status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchStatus::Ok => "OK",
            LaunchStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(LaunchStatus::Ok),
            "ERROR" => Ok(LaunchStatus::Error),
            other => Err(format!("unknown launch status: {}", other)),
        }
    }
}

/// A row of the `sessions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub host_id: String,
    pub logon_time: NaiveDateTime,
    /// Always at or after `logon_time`.
    pub last_heartbeat: NaiveDateTime,
    pub state: SessionState,
    /// Group policy processing time during logon.
    pub gpo_apply_ms: Option<i64>,
    pub profile_size_mb: Option<i64>,
    pub image_version: Option<String>,
    pub agent_version: Option<String>,
}

impl SessionRecord {
    /// An orphan candidate: already marked Orphaned, or Active with a
    /// heartbeat older than `staleness` at `as_of`.
    #[allow(dead_code)] // Mirrors the orphaned-sessions query predicate
    pub fn is_stale(&self, as_of: NaiveDateTime, staleness: Duration) -> bool {
        match self.state {
            SessionState::Orphaned => true,
            SessionState::Active => self.last_heartbeat < as_of - staleness,
            SessionState::Disconnected => false,
        }
    }
}

/// A row of the `mount_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountEvent {
    pub user_id: String,
    pub host_id: String,
    pub event_time: NaiveDateTime,
    pub kind: MountEventKind,
    pub error_code: Option<String>,
    pub storage_path: Option<String>,
}

/// A row of the `app_launches` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppLaunchEvent {
    pub user_id: String,
    pub app_name: String,
    pub host_id: String,
    pub launch_time: NaiveDateTime,
    pub duration_ms: Option<i64>,
    pub status: LaunchStatus,
    pub error_code: Option<String>,
}

/// Which aggregation to compute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum RollupKind {
    /// Sessions started per (date, hour)
    #[default]
    PeakConcurrency,
    /// Profile mount failures per user
    MountFailures,
    /// Distinct image/agent versions per host
    VersionDrift,
    /// Application launch errors per app
    LaunchErrors,
    /// Orphaned or stale sessions per host
    OrphanedSessions,
}

impl RollupKind {
    /// Stable name used on the command line, in config and in reports.
    pub fn name(&self) -> &'static str {
        match self {
            RollupKind::PeakConcurrency => "peak-concurrency",
            RollupKind::MountFailures => "mount-failures",
            RollupKind::VersionDrift => "version-drift",
            RollupKind::LaunchErrors => "launch-errors",
            RollupKind::OrphanedSessions => "orphaned-sessions",
        }
    }

    /// Human-readable report title.
    pub fn title(&self) -> &'static str {
        match self {
            RollupKind::PeakConcurrency => "Peak Concurrency by Hour",
            RollupKind::MountFailures => "Profile Mount Failures by User",
            RollupKind::VersionDrift => "Version Drift by Host",
            RollupKind::LaunchErrors => "Application Launch Errors",
            RollupKind::OrphanedSessions => "Orphaned Sessions by Host",
        }
    }

    /// Field names of every record this rollup produces, in order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            RollupKind::PeakConcurrency => &["d", "h", "concurrent"],
            RollupKind::MountFailures => &["user_id", "failures", "total", "failure_rate"],
            RollupKind::VersionDrift => &[
                "host_id",
                "image_versions",
                "agent_versions",
                "latest_image",
                "latest_agent",
                "sessions",
            ],
            RollupKind::LaunchErrors => &["app_name", "errors", "launches", "error_rate"],
            RollupKind::OrphanedSessions => &["host_id", "orphaned", "oldest_heartbeat"],
        }
    }
}

impl fmt::Display for RollupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Longest accepted lookback: one hundred years.
pub const MAX_LOOKBACK_HOURS: u32 = 24 * 365 * 100;

/// Half-open `[since, until)` bound on event time. Both ends optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: Option<NaiveDateTime>,
    pub until: Option<NaiveDateTime>,
}

impl TimeWindow {
    /// All history.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// The `hours` leading up to `as_of`, or `None` when that start is
    /// before the earliest representable timestamp.
    pub fn lookback(as_of: NaiveDateTime, hours: u32) -> Option<Self> {
        let since = as_of.checked_sub_signed(Duration::hours(i64::from(hours)))?;
        Some(Self {
            since: Some(since),
            until: None,
        })
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let since = self
            .since
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| "-inf".to_string());
        let until = self
            .until
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| "+inf".to_string());
        write!(f, "[{}, {})", since, until)
    }
}

/// A single value inside a rollup record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Null,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Null => Ok(()),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One row of rollup output: grouping key columns followed by metrics,
/// in query column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollupRecord {
    fields: Vec<(&'static str, FieldValue)>,
}

impl RollupRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, keeping insertion order.
    pub fn with(mut self, name: &'static str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    /// Integer field lookup, for tests and threshold checks.
    #[allow(dead_code)] // Convenience accessor
    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(FieldValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }
}

impl Serialize for RollupRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl fmt::Display for RollupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                FieldValue::Text(s) => write!(f, "'{}': '{}'", name, s)?,
                FieldValue::Null => write!(f, "'{}': null", name)?,
                other => write!(f, "'{}': {}", name, other)?,
            }
        }
        write!(f, "}}")
    }
}

/// Ratio of `part` to `whole`, rounded to four decimals. Zero when `whole` is zero.
pub fn rate(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    ((part as f64 / whole as f64) * 10_000.0).round() / 10_000.0
}

/// Metadata about a rollup run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    /// Rollup that produced the records.
    pub kind: RollupKind,
    /// Time window the query was bounded by.
    pub window: TimeWindow,
    /// Maximum number of records requested.
    pub limit: usize,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Number of records returned.
    pub row_count: usize,
    /// Wall time spent connecting and querying.
    pub duration_seconds: f64,
}

/// Materialized rollup result handed to a report sink.
#[derive(Debug, Clone, Serialize)]
pub struct RollupReport {
    pub metadata: ReportMetadata,
    pub records: Vec<RollupRecord>,
}

impl RollupReport {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
