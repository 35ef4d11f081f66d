//! Rollup execution.
//!
//! [`run_rollup`] executes exactly one read-only statement on a caller-owned
//! connection and materializes the whole result. [`RollupJob`] wraps it with
//! connection acquisition and release for a single run.

mod queries;
mod rows;

use crate::config::RollupConfig;
use crate::db::{classify_query_error, Connection, Connector, Statement};
use crate::error::{JobError, QueryError};
use crate::models::{ReportMetadata, RollupKind, RollupRecord, RollupReport, TimeWindow};
use chrono::{NaiveDateTime, Utc};
use rows::{
    LaunchErrorRow, MountFailureRow, OrphanedSessionRow, PeakConcurrencyRow, VersionDriftRow,
};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Number of records returned when no limit is given.
pub const DEFAULT_LIMIT: usize = 10;

/// Everything that determines a rollup's result.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupRequest {
    pub kind: RollupKind,
    pub window: TimeWindow,
    /// Maximum records returned, counted after ordering.
    pub limit: usize,
    /// Minimum failures per user (mount-failures only).
    pub failure_threshold: i64,
    /// Heartbeat age that makes an Active session orphaned (orphaned-sessions only).
    pub staleness_minutes: u32,
    /// Reference time for staleness, fixed once per invocation.
    pub as_of: NaiveDateTime,
}

impl RollupRequest {
    /// A request with default limit, threshold and staleness over all history.
    pub fn new(kind: RollupKind, as_of: NaiveDateTime) -> Self {
        Self {
            kind,
            window: TimeWindow::unbounded(),
            limit: DEFAULT_LIMIT,
            failure_threshold: 3,
            staleness_minutes: 60,
            as_of,
        }
    }

    /// Build a request from config. An explicit `since` wins over `lookback_hours`.
    ///
    /// Fails when the merged window is empty or the lookback reaches past
    /// the earliest representable timestamp.
    pub fn from_config(
        config: &RollupConfig,
        window: TimeWindow,
        as_of: NaiveDateTime,
    ) -> Result<Self, String> {
        let window = match (window.since, config.lookback_hours) {
            (None, Some(hours)) => {
                let lookback = TimeWindow::lookback(as_of, hours)
                    .ok_or_else(|| format!("Lookback of {} hours is out of range", hours))?;
                TimeWindow {
                    since: lookback.since,
                    until: window.until,
                }
            }
            _ => window,
        };

        if let (Some(since), Some(until)) = (window.since, window.until) {
            if since >= until {
                return Err(format!(
                    "Window start {} must be earlier than --until {}",
                    since, until
                ));
            }
        }

        Ok(Self {
            kind: config.kind,
            window,
            limit: config.limit,
            failure_threshold: config.failure_threshold,
            staleness_minutes: config.staleness_minutes,
            as_of,
        })
    }
}

/// Execute the rollup described by `request` on `conn`.
///
/// Either the complete, ordered result (at most `request.limit` records)
/// is returned or an error is; on timeout or cancellation the in-flight
/// query is abandoned and the connection should not be reused.
pub async fn run_rollup(
    conn: &mut Connection,
    request: &RollupRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<RollupRecord>, QueryError> {
    let rollup = request.kind.name();
    let statement = queries::build(request, conn.dialect());
    debug!("Rollup {} SQL: {}", rollup, statement.sql);
    debug!("Rollup {} params: {:?}", rollup, statement.params);

    let fetch = tokio::time::timeout(timeout, fetch_records(conn, request.kind, &statement));
    let records = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(QueryError::Cancelled { rollup: rollup.to_string() });
        }
        result = fetch => match result {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return Err(classify_query_error(rollup, e)),
            Err(_) => {
                return Err(QueryError::Timeout {
                    rollup: rollup.to_string(),
                    after: timeout,
                })
            }
        },
    };

    debug!("Rollup {} returned {} records", rollup, records.len());
    Ok(records)
}

async fn fetch_records(
    conn: &mut Connection,
    kind: RollupKind,
    statement: &Statement,
) -> Result<Vec<RollupRecord>, sqlx::Error> {
    let records = match kind {
        RollupKind::PeakConcurrency => {
            into_records(conn.fetch_all::<PeakConcurrencyRow>(statement).await?)
        }
        RollupKind::MountFailures => {
            into_records(conn.fetch_all::<MountFailureRow>(statement).await?)
        }
        RollupKind::VersionDrift => {
            into_records(conn.fetch_all::<VersionDriftRow>(statement).await?)
        }
        RollupKind::LaunchErrors => {
            into_records(conn.fetch_all::<LaunchErrorRow>(statement).await?)
        }
        RollupKind::OrphanedSessions => {
            into_records(conn.fetch_all::<OrphanedSessionRow>(statement).await?)
        }
    };
    Ok(records)
}

fn into_records<R: Into<RollupRecord>>(rows: Vec<R>) -> Vec<RollupRecord> {
    rows.into_iter().map(Into::into).collect()
}

/// One self-contained rollup run: connect, query, release.
#[derive(Debug, Clone)]
pub struct RollupJob {
    connector: Connector,
    query_timeout: Duration,
}

impl RollupJob {
    pub fn new(connector: Connector, query_timeout: Duration) -> Self {
        Self {
            connector,
            query_timeout,
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Run `request` on a fresh connection.
    ///
    /// The connection is closed gracefully after a successful query and
    /// dropped on any failure; it never outlives this call. A connect
    /// failure returns before any query is issued.
    pub async fn run(
        &self,
        request: &RollupRequest,
        cancel: &CancellationToken,
    ) -> Result<RollupReport, JobError> {
        let start_time = Instant::now();
        info!(
            "Running {} rollup over {} (limit {})",
            request.kind, request.window, request.limit
        );

        let mut conn = self.connector.connect(cancel).await?;

        match run_rollup(&mut conn, request, self.query_timeout, cancel).await {
            Ok(records) => {
                conn.close().await;
                let duration = start_time.elapsed().as_secs_f64();
                info!(
                    "Rollup {} produced {} records in {:.2}s",
                    request.kind,
                    records.len(),
                    duration
                );
                Ok(RollupReport {
                    metadata: ReportMetadata {
                        kind: request.kind,
                        window: request.window,
                        limit: request.limit,
                        generated_at: Utc::now(),
                        row_count: records.len(),
                        duration_seconds: duration,
                    },
                    records,
                })
            }
            Err(e) => {
                drop(conn);
                if e.is_interrupted() {
                    warn!("Rollup {} interrupted: {}", request.kind, e);
                } else {
                    warn!("Rollup {} failed: {}", request.kind, e);
                }
                Err(e.into())
            }
        }
    }
}
