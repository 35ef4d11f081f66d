//! Mapping driver errors onto the job's error taxonomy.
//!
//! MySQL errors are classified by server error number (the SQLSTATE is too
//! coarse: syntax errors and missing grants share `42000`); SQLite errors
//! by primary result code.

use crate::error::{ConnectionError, QueryError};
use sqlx::error::DatabaseError;
use sqlx::mysql::MySqlDatabaseError;

/// Vendor error code carried by a database error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DbCode {
    MySql(u16),
    Sqlite(i64),
    Unknown,
}

impl DbCode {
    fn of(err: &dyn DatabaseError) -> Self {
        if let Some(mysql) = err.try_downcast_ref::<MySqlDatabaseError>() {
            return DbCode::MySql(mysql.number());
        }
        match err.code().and_then(|c| c.parse::<i64>().ok()) {
            // Extended result codes keep the primary code in the low byte.
            Some(code) => DbCode::Sqlite(code & 0xff),
            None => DbCode::Unknown,
        }
    }

    fn is_auth_failure(&self) -> bool {
        match self {
            // ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_ACCESS_DENIED_NO_PASSWORD_ERROR
            DbCode::MySql(code) => matches!(code, 1044 | 1045 | 1698),
            // SQLITE_AUTH
            DbCode::Sqlite(code) => *code == 23,
            DbCode::Unknown => false,
        }
    }

    fn is_permission_failure(&self) -> bool {
        match self {
            // ER_DBACCESS_DENIED_ERROR, ER_TABLEACCESS_DENIED_ERROR,
            // ER_COLUMNACCESS_DENIED_ERROR, ER_SPECIFIC_ACCESS_DENIED_ERROR
            DbCode::MySql(code) => matches!(code, 1044 | 1142 | 1143 | 1227),
            // SQLITE_PERM, SQLITE_AUTH
            DbCode::Sqlite(code) => matches!(code, 3 | 23),
            DbCode::Unknown => false,
        }
    }

    fn is_malformed(&self) -> bool {
        match self {
            // ER_BAD_FIELD_ERROR, ER_PARSE_ERROR, ER_NO_SUCH_TABLE
            DbCode::MySql(code) => matches!(code, 1054 | 1064 | 1146),
            // SQLITE_ERROR covers syntax errors and unknown tables or columns.
            DbCode::Sqlite(code) => *code == 1,
            DbCode::Unknown => false,
        }
    }
}

/// Classify a failure to open a connection to `target`.
pub fn classify_connect_error(target: &str, err: sqlx::Error) -> ConnectionError {
    let target = target.to_string();
    match err {
        sqlx::Error::Database(db) => {
            let reason = db.message().to_string();
            if DbCode::of(&*db).is_auth_failure() {
                ConnectionError::AuthRejected { target, reason }
            } else {
                ConnectionError::Unreachable { target, reason }
            }
        }
        sqlx::Error::Configuration(e) => ConnectionError::InvalidConfig(e.to_string()),
        sqlx::Error::Tls(e) => ConnectionError::Unreachable {
            target,
            reason: format!("TLS handshake failed: {}", e),
        },
        other => ConnectionError::Unreachable {
            target,
            reason: other.to_string(),
        },
    }
}

/// Classify a failure while running the `rollup` query.
pub fn classify_query_error(rollup: &str, err: sqlx::Error) -> QueryError {
    let rollup = rollup.to_string();
    if let sqlx::Error::Database(ref db) = err {
        let code = DbCode::of(&**db);
        let reason = db.message().to_string();
        if code.is_permission_failure() {
            return QueryError::PermissionDenied { rollup, reason };
        }
        if code.is_malformed() {
            return QueryError::Malformed { rollup, reason };
        }
    }
    if let sqlx::Error::ColumnNotFound(ref column) = err {
        return QueryError::Malformed {
            rollup,
            reason: format!("result is missing column '{}'", column),
        };
    }
    QueryError::Execution { rollup, source: err }
}
