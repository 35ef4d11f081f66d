//! Typed result rows for each rollup, and their conversion into records.
//!
//! Column names here must match the aliases produced in `queries`.

use crate::models::{rate, RollupRecord};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct PeakConcurrencyRow {
    pub d: String,
    pub h: i64,
    pub concurrent: i64,
}

impl From<PeakConcurrencyRow> for RollupRecord {
    fn from(row: PeakConcurrencyRow) -> Self {
        RollupRecord::new()
            .with("d", row.d)
            .with("h", row.h)
            .with("concurrent", row.concurrent)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct MountFailureRow {
    pub user_id: String,
    pub failures: i64,
    pub total: i64,
}

impl From<MountFailureRow> for RollupRecord {
    fn from(row: MountFailureRow) -> Self {
        let failure_rate = rate(row.failures, row.total);
        RollupRecord::new()
            .with("user_id", row.user_id)
            .with("failures", row.failures)
            .with("total", row.total)
            .with("failure_rate", failure_rate)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct VersionDriftRow {
    pub host_id: String,
    pub image_versions: i64,
    pub agent_versions: i64,
    pub latest_image: Option<String>,
    pub latest_agent: Option<String>,
    pub sessions: i64,
}

impl From<VersionDriftRow> for RollupRecord {
    fn from(row: VersionDriftRow) -> Self {
        RollupRecord::new()
            .with("host_id", row.host_id)
            .with("image_versions", row.image_versions)
            .with("agent_versions", row.agent_versions)
            .with("latest_image", row.latest_image)
            .with("latest_agent", row.latest_agent)
            .with("sessions", row.sessions)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct LaunchErrorRow {
    pub app_name: String,
    pub errors: i64,
    pub launches: i64,
}

impl From<LaunchErrorRow> for RollupRecord {
    fn from(row: LaunchErrorRow) -> Self {
        let error_rate = rate(row.errors, row.launches);
        RollupRecord::new()
            .with("app_name", row.app_name)
            .with("errors", row.errors)
            .with("launches", row.launches)
            .with("error_rate", error_rate)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub(crate) struct OrphanedSessionRow {
    pub host_id: String,
    pub orphaned: i64,
    pub oldest_heartbeat: Option<String>,
}

impl From<OrphanedSessionRow> for RollupRecord {
    fn from(row: OrphanedSessionRow) -> Self {
        RollupRecord::new()
            .with("host_id", row.host_id)
            .with("orphaned", row.orphaned)
            .with("oldest_heartbeat", row.oldest_heartbeat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, RollupKind};

    #[test]
    fn test_mount_failure_record_has_rate() {
        let record = RollupRecord::from(MountFailureRow {
            user_id: "alice".to_string(),
            failures: 3,
            total: 5,
        });
        assert_eq!(
            record.names().collect::<Vec<_>>(),
            vec!["user_id", "failures", "total", "failure_rate"]
        );
        assert_eq!(record.get("failure_rate"), Some(&FieldValue::Float(0.6)));
    }

    #[test]
    fn test_missing_versions_become_null() {
        let record = RollupRecord::from(VersionDriftRow {
            host_id: "avd-7".to_string(),
            image_versions: 0,
            agent_versions: 0,
            latest_image: None,
            latest_agent: None,
            sessions: 4,
        });
        assert_eq!(record.get("latest_image"), Some(&FieldValue::Null));
        assert_eq!(record.integer("sessions"), Some(4));
    }

    #[test]
    fn test_record_fields_match_kind_columns() {
        let peak = RollupRecord::from(PeakConcurrencyRow {
            d: "2026-10-19".to_string(),
            h: 9,
            concurrent: 2,
        });
        let launches = RollupRecord::from(LaunchErrorRow {
            app_name: "Excel".to_string(),
            errors: 1,
            launches: 4,
        });
        let orphans = RollupRecord::from(OrphanedSessionRow {
            host_id: "avd-1".to_string(),
            orphaned: 1,
            oldest_heartbeat: None,
        });

        let names = |r: &RollupRecord| r.names().collect::<Vec<_>>();
        assert_eq!(names(&peak), RollupKind::PeakConcurrency.columns());
        assert_eq!(names(&launches), RollupKind::LaunchErrors.columns());
        assert_eq!(names(&orphans), RollupKind::OrphanedSessions.columns());
    }
}
