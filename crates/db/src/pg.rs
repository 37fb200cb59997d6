//! Postgres driver on sqlx.
//!
//! ## Error Mapping
//!
//! sqlx errors are mapped to [`DbError`] as follows:
//!
//! | sqlx error | DbError | class |
//! |------------|---------|-------|
//! | `Io`, `Tls` | `Unreachable` | Transient |
//! | `PoolTimedOut` | `Timeout` | Transient |
//! | `PoolClosed`, `Protocol` | `ConnectionLost` | Transient |
//! | `Database` matching the transient message set | `ConnectionLost` | Transient |
//! | `Database` with auth SQLSTATE (28000/28P01) | `Auth` | Permanent |
//! | `Database` (other), `Configuration` | `Query` | Permanent |

use std::time::Duration;

use async_trait::async_trait;
use sqlx::Postgres;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;

use sift_core::config::DatabaseConfig;

use crate::driver::{SqlConnection, SqlDriver, SqlParam};
use crate::error::DbError;

/// Provider messages that indicate a dropped or unreachable connection.
const TRANSIENT_MESSAGES: &[&str] = &[
    "cannot reach server",
    "connection terminated",
    "connection reset",
];

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens sqlx Postgres pools for the connection manager.
#[derive(Debug, Clone)]
pub struct PgDriver {
    url: String,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgDriver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 5,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(config.url.clone()).with_max_connections(config.max_connections)
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }
}

#[async_trait]
impl SqlDriver for PgDriver {
    type Conn = PgHandle;

    async fn connect(&self) -> Result<PgHandle, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(PgHandle { pool })
    }
}

/// An open Postgres pool behind the generic connection contract.
#[derive(Debug, Clone)]
pub struct PgHandle {
    pool: PgPool,
}

#[async_trait]
impl SqlConnection for PgHandle {
    type Row = PgRow;

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        let query = bind_params(sqlx::query(sql), params);
        let result = query.execute(&self.pool).await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<PgRow>, DbError> {
        let query = bind_params(sqlx::query(sql), params);
        query.fetch_all(&self.pool).await.map_err(map_sqlx_error)
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Text(v) => query.bind(v.clone()),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Uuid(v) => query.bind(*v),
            SqlParam::Timestamp(v) => query.bind(*v),
            SqlParam::Json(v) => query.bind(v.clone()),
            SqlParam::Null => query.bind(Option::<String>::None),
        };
    }
    query
}

fn is_transient_message(message: &str) -> bool {
    TRANSIENT_MESSAGES.iter().any(|m| message.contains(m))
}

fn map_sqlx_error(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::Io(io) => DbError::Unreachable(io.to_string()),
        sqlx::Error::Tls(tls) => DbError::Unreachable(tls.to_string()),
        sqlx::Error::PoolTimedOut => {
            DbError::Timeout("connection pool acquire timed out".to_string())
        }
        sqlx::Error::PoolClosed => DbError::ConnectionLost("connection pool closed".to_string()),
        sqlx::Error::Protocol(message) => DbError::ConnectionLost(message),
        sqlx::Error::Configuration(e) => DbError::Query(e.to_string()),
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            if is_transient_message(&message) {
                DbError::ConnectionLost(message)
            } else if matches!(db.code().as_deref(), Some("28000") | Some("28P01")) {
                DbError::Auth(message)
            } else {
                DbError::Query(message)
            }
        }
        other => {
            let message = other.to_string();
            if is_transient_message(&message) {
                DbError::ConnectionLost(message)
            } else {
                DbError::Query(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::Classify;

    #[test]
    fn io_errors_map_transient() {
        let err = map_sqlx_error(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        assert!(matches!(err, DbError::Unreachable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn pool_timeout_maps_transient() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn protocol_errors_map_transient() {
        let err = map_sqlx_error(sqlx::Error::Protocol("connection reset".to_string()));
        assert!(matches!(err, DbError::ConnectionLost(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn transient_message_set_is_honored() {
        assert!(is_transient_message("FATAL: cannot reach server at host"));
        assert!(is_transient_message("connection terminated unexpectedly"));
        assert!(is_transient_message("read error: connection reset by peer"));
        assert!(!is_transient_message("syntax error at or near \"SELEC\""));
    }

    #[test]
    fn row_not_found_maps_permanent() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());
    }
}
