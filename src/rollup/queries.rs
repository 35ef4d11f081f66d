//! SQL for each rollup kind.
//!
//! Every statement is a single read-only `GROUP BY` whose `ORDER BY` ends
//! in the full grouping key, so output order is reproducible. MySQL and
//! SQLite differ only in date functions and integer casts.

use super::RollupRequest;
use crate::db::{Dialect, Param, Statement};
use crate::models::{LaunchStatus, MountEventKind, RollupKind, SessionState, TimeWindow};
use chrono::Duration;

/// Build the statement for `request` in the given dialect.
pub fn build(request: &RollupRequest, dialect: Dialect) -> Statement {
    let mut stmt = match request.kind {
        RollupKind::PeakConcurrency => peak_concurrency(request, dialect),
        RollupKind::MountFailures => mount_failures(request, dialect),
        RollupKind::VersionDrift => version_drift(request),
        RollupKind::LaunchErrors => launch_errors(request, dialect),
        RollupKind::OrphanedSessions => orphaned_sessions(request, dialect),
    };
    stmt.push_bind(" LIMIT ?", Param::Integer(limit_param(request.limit)));
    stmt
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Append `[since, until)` conditions on `column`. `has_where` says whether
/// the statement already has a WHERE clause.
fn push_window(stmt: &mut Statement, column: &str, window: &TimeWindow, has_where: bool) {
    let mut keyword = if has_where { " AND" } else { " WHERE" };
    if let Some(since) = window.since {
        stmt.push_bind(&format!("{} {} >= ?", keyword, column), Param::Timestamp(since));
        keyword = " AND";
    }
    if let Some(until) = window.until {
        stmt.push_bind(&format!("{} {} < ?", keyword, column), Param::Timestamp(until));
    }
}

/// Count of rows where `column` equals the next bound parameter.
fn count_where(dialect: Dialect, column: &str) -> String {
    match dialect {
        Dialect::MySql => format!("CAST(SUM(CASE WHEN {} = ? THEN 1 ELSE 0 END) AS SIGNED)", column),
        Dialect::Sqlite => format!("SUM(CASE WHEN {} = ? THEN 1 ELSE 0 END)", column),
    }
}

fn peak_concurrency(request: &RollupRequest, dialect: Dialect) -> Statement {
    let select = match dialect {
        Dialect::MySql => {
            "SELECT DATE_FORMAT(logon_time, '%Y-%m-%d') AS d, \
             CAST(HOUR(logon_time) AS SIGNED) AS h, \
             COUNT(*) AS concurrent \
             FROM sessions"
        }
        Dialect::Sqlite => {
            "SELECT strftime('%Y-%m-%d', logon_time) AS d, \
             CAST(strftime('%H', logon_time) AS INTEGER) AS h, \
             COUNT(*) AS concurrent \
             FROM sessions"
        }
    };
    let mut stmt = Statement::new(select);
    push_window(&mut stmt, "logon_time", &request.window, false);
    stmt.push(" GROUP BY d, h ORDER BY d DESC, h DESC");
    stmt
}

fn mount_failures(request: &RollupRequest, dialect: Dialect) -> Statement {
    let mut stmt = Statement::new("SELECT user_id, ");
    stmt.push_bind(
        &format!("{} AS failures, ", count_where(dialect, "kind")),
        Param::Text(MountEventKind::MountFailure.as_str().to_string()),
    );
    stmt.push("COUNT(*) AS total FROM mount_events");
    push_window(&mut stmt, "event_time", &request.window, false);
    stmt.push(" GROUP BY user_id");
    stmt.push_bind(
        " HAVING failures >= ?",
        Param::Integer(request.failure_threshold),
    );
    stmt.push(" ORDER BY failures DESC, user_id ASC");
    stmt
}

fn version_drift(request: &RollupRequest) -> Statement {
    let mut stmt = Statement::new(
        "SELECT host_id, \
         COUNT(DISTINCT image_version) AS image_versions, \
         COUNT(DISTINCT agent_version) AS agent_versions, \
         MAX(image_version) AS latest_image, \
         MAX(agent_version) AS latest_agent, \
         COUNT(*) AS sessions \
         FROM sessions",
    );
    push_window(&mut stmt, "logon_time", &request.window, false);
    stmt.push(
        " GROUP BY host_id \
         ORDER BY image_versions DESC, agent_versions DESC, host_id ASC",
    );
    stmt
}

fn launch_errors(request: &RollupRequest, dialect: Dialect) -> Statement {
    let mut stmt = Statement::new("SELECT app_name, ");
    stmt.push_bind(
        &format!("{} AS errors, ", count_where(dialect, "status")),
        Param::Text(LaunchStatus::Error.as_str().to_string()),
    );
    stmt.push("COUNT(*) AS launches FROM app_launches");
    push_window(&mut stmt, "launch_time", &request.window, false);
    stmt.push(" GROUP BY app_name ORDER BY errors DESC, launches DESC, app_name ASC");
    stmt
}

fn orphaned_sessions(request: &RollupRequest, dialect: Dialect) -> Statement {
    let oldest = match dialect {
        Dialect::MySql => "DATE_FORMAT(MIN(last_heartbeat), '%Y-%m-%d %H:%i:%s')",
        Dialect::Sqlite => "strftime('%Y-%m-%d %H:%M:%S', MIN(last_heartbeat))",
    };
    let cutoff = request.as_of - Duration::minutes(i64::from(request.staleness_minutes));

    let mut stmt = Statement::new(format!(
        "SELECT host_id, COUNT(*) AS orphaned, {} AS oldest_heartbeat FROM sessions",
        oldest
    ));
    stmt.push_bind(
        " WHERE (state = ?",
        Param::Text(SessionState::Orphaned.as_str().to_string()),
    );
    stmt.push_bind(
        " OR (state = ?",
        Param::Text(SessionState::Active.as_str().to_string()),
    );
    stmt.push_bind(" AND last_heartbeat < ?))", Param::Timestamp(cutoff));
    push_window(&mut stmt, "logon_time", &request.window, true);
    stmt.push(" GROUP BY host_id ORDER BY orphaned DESC, host_id ASC");
    stmt
}
