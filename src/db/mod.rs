//! Data sink connections.
//!
//! A [`Connector`] turns a [`DatabaseConfig`] into exclusively owned
//! [`Connection`]s. Every connection carries a lease counted by its
//! connector, so a handle that outlives its run shows up in
//! [`Connector::open_handles`].

mod classify;
mod statement;

pub use classify::{classify_connect_error, classify_query_error};
pub use statement::{Param, Statement};

use crate::config::{Backend, DatabaseConfig};
use crate::error::ConnectionError;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Connection as _, FromRow};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// SQL flavour of an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

/// Opens connections to the data sink described by a [`DatabaseConfig`].
#[derive(Debug, Clone)]
pub struct Connector {
    config: DatabaseConfig,
    open: Arc<AtomicUsize>,
}

impl Connector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Location of the sink, safe to log.
    pub fn target(&self) -> String {
        self.config.target()
    }

    /// Connections opened by this connector and not yet released.
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Open a connection, bounded by the configured connect timeout and by `cancel`.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<Connection, ConnectionError> {
        let target = self.target();
        let after = Duration::from_secs(self.config.connect_timeout_seconds);
        debug!("Connecting to {}", target);

        let attempt = tokio::time::timeout(after, self.open_inner());
        let inner = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ConnectionError::Cancelled { target });
            }
            result = attempt => match result {
                Ok(inner) => inner?,
                Err(_) => return Err(ConnectionError::Timeout { target, after }),
            },
        };

        self.open.fetch_add(1, Ordering::SeqCst);
        info!("Connected to {}", target);

        Ok(Connection {
            inner,
            lease: Lease {
                open: Arc::clone(&self.open),
            },
        })
    }

    async fn open_inner(&self) -> Result<Inner, ConnectionError> {
        let target = self.target();
        match self.config.backend {
            Backend::Mysql => {
                let options = self.mysql_options()?;
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| classify_connect_error(&target, e))?;
                Ok(Inner::MySql(conn))
            }
            Backend::Sqlite => {
                let options = self.sqlite_options()?;
                let conn = options
                    .connect()
                    .await
                    .map_err(|e| classify_connect_error(&target, e))?;
                Ok(Inner::Sqlite(conn))
            }
        }
    }

    fn mysql_options(&self) -> Result<MySqlConnectOptions, ConnectionError> {
        let config = &self.config;
        if config.host.is_empty() {
            return Err(ConnectionError::InvalidConfig("database host is empty".to_string()));
        }

        let ssl_mode = match (config.tls, config.tls_ca.is_some()) {
            (true, true) => MySqlSslMode::VerifyCa,
            (true, false) => MySqlSslMode::Required,
            (false, _) => MySqlSslMode::Preferred,
        };

        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .ssl_mode(ssl_mode);
        if let Some(ref ca) = config.tls_ca {
            options = options.ssl_ca(ca);
        }
        Ok(options)
    }

    fn sqlite_options(&self) -> Result<SqliteConnectOptions, ConnectionError> {
        let path = self.config.path.as_ref().ok_or_else(|| {
            ConnectionError::InvalidConfig("sqlite backend requires a database path".to_string())
        })?;

        Ok(SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .read_only(true))
    }
}

enum Inner {
    MySql(MySqlConnection),
    Sqlite(SqliteConnection),
}

/// Decrements the connector's open count when the connection goes away.
struct Lease {
    open: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An open, exclusively owned connection to the data sink.
///
/// Dropping it closes the socket; [`Connection::close`] additionally sends
/// a graceful goodbye to the server.
pub struct Connection {
    inner: Inner,
    lease: Lease,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("dialect", &self.dialect())
            .finish()
    }
}

impl Connection {
    pub fn dialect(&self) -> Dialect {
        match self.inner {
            Inner::MySql(_) => Dialect::MySql,
            Inner::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Run `statement` and decode every row as `T`.
    pub async fn fetch_all<T>(&mut self, statement: &Statement) -> Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> FromRow<'r, MySqlRow> + for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        debug_assert_eq!(statement.placeholder_count(), statement.params.len());
        match &mut self.inner {
            Inner::MySql(conn) => {
                let mut query = sqlx::query_as::<sqlx::MySql, T>(&statement.sql);
                for param in &statement.params {
                    query = match param {
                        Param::Text(s) => query.bind(s.clone()),
                        Param::Integer(n) => query.bind(*n),
                        Param::Timestamp(t) => query.bind(*t),
                    };
                }
                query.fetch_all(conn).await
            }
            Inner::Sqlite(conn) => {
                let mut query = sqlx::query_as::<sqlx::Sqlite, T>(&statement.sql);
                for param in &statement.params {
                    query = match param {
                        Param::Text(s) => query.bind(s.clone()),
                        Param::Integer(n) => query.bind(*n),
                        // SQLite stores timestamps as sortable text.
                        Param::Timestamp(t) => query.bind(statement::sqlite_timestamp(t)),
                    };
                }
                query.fetch_all(conn).await
            }
        }
    }

    /// Gracefully close the connection. The lease is released either way.
    pub async fn close(self) {
        let Connection { inner, lease } = self;
        let result = match inner {
            Inner::MySql(conn) => conn.close().await,
            Inner::Sqlite(conn) => conn.close().await,
        };
        if let Err(e) = result {
            warn!("Error while closing connection: {}", e);
        }
        drop(lease);
        debug!("Connection released");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Backend;
    use sqlx::{Connection as _, Executor};
    use std::path::Path;
    use tempfile::TempDir;

    const SCHEMA: &str = include_str!("../../fixtures/schema.sqlite.sql");

    /// A fresh on-disk SQLite database with the event tables created.
    pub(crate) async fn sqlite_fixture() -> (TempDir, DatabaseConfig) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("avd_ops.db");

        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        conn.execute(SCHEMA).await.unwrap();
        conn.close().await.unwrap();

        (dir, sqlite_config(&path))
    }

    pub(crate) fn sqlite_config(path: &Path) -> DatabaseConfig {
        DatabaseConfig {
            backend: Backend::Sqlite,
            path: Some(path.to_path_buf()),
            ..DatabaseConfig::default()
        }
    }

    /// Writable connection for seeding fixture rows.
    pub(crate) async fn writer(config: &DatabaseConfig) -> SqliteConnection {
        SqliteConnectOptions::new()
            .filename(config.path.as_ref().unwrap())
            .connect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_release() {
        let (_dir, config) = sqlite_fixture().await;
        let connector = Connector::new(config);
        let cancel = CancellationToken::new();

        let conn = connector.connect(&cancel).await.unwrap();
        assert_eq!(conn.dialect(), Dialect::Sqlite);
        assert_eq!(connector.open_handles(), 1);

        conn.close().await;
        assert_eq!(connector.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_lease() {
        let (_dir, config) = sqlite_fixture().await;
        let connector = Connector::new(config);
        let cancel = CancellationToken::new();

        {
            let _conn = connector.connect(&cancel).await.unwrap();
            assert_eq!(connector.open_handles(), 1);
        }
        assert_eq!(connector.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_missing_database_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let connector = Connector::new(sqlite_config(&dir.path().join("absent.db")));

        let err = connector.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Unreachable { .. }), "{:?}", err);
        assert_eq!(connector.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_without_path_is_invalid_config() {
        let connector = Connector::new(DatabaseConfig {
            backend: Backend::Sqlite,
            ..DatabaseConfig::default()
        });

        let err = connector.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_cancelled_connect() {
        let (_dir, config) = sqlite_fixture().await;
        let connector = Connector::new(config);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = connector.connect(&cancel).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Cancelled { .. }));
        assert_eq!(connector.open_handles(), 0);
    }
}
