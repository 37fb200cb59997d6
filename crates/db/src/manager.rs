//! Connection lifecycle and retry management.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use sift_core::{Classify, RetryPolicy};

use crate::driver::{SqlConnection, SqlDriver, SqlParam};
use crate::error::DbError;

/// Lifecycle state of the managed handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Structured health-check result. Returned, never thrown, so liveness
/// probes can poll safely.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub error: Option<String>,
}

const DEFAULT_HEALTH_DEADLINE: Duration = Duration::from_secs(2);
const DEFAULT_STATEMENT_DEADLINE: Duration = Duration::from_secs(30);

/// Owns a single database handle and serializes its lifecycle.
///
/// The connect path is single-flight: an async mutex is held for the whole
/// attempt, so concurrent callers wait on the in-flight attempt instead of
/// starting a second one. Query retries sleep inside the calling operation;
/// a caller that drops the future abandons the loop between attempts.
pub struct ConnectionManager<D: SqlDriver> {
    driver: D,
    conn: tokio::sync::RwLock<Option<Arc<D::Conn>>>,
    state: RwLock<ConnectionState>,
    connect_lock: Mutex<()>,
    connect_policy: RetryPolicy,
    query_policy: RetryPolicy,
    health_deadline: Duration,
    statement_deadline: Duration,
}

impl<D: SqlDriver> ConnectionManager<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            conn: tokio::sync::RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            connect_lock: Mutex::new(()),
            connect_policy: RetryPolicy::connect(),
            query_policy: RetryPolicy::query(),
            health_deadline: DEFAULT_HEALTH_DEADLINE,
            statement_deadline: DEFAULT_STATEMENT_DEADLINE,
        }
    }

    pub fn with_policies(mut self, connect: RetryPolicy, query: RetryPolicy) -> Self {
        self.connect_policy = connect;
        self.query_policy = query;
        self
    }

    pub fn with_health_deadline(mut self, deadline: Duration) -> Self {
        self.health_deadline = deadline;
        self
    }

    /// Deadline applied to each statement attempt. Exceeding it counts as a
    /// transient failure and goes through the usual retry path.
    pub fn with_statement_deadline(mut self, deadline: Duration) -> Self {
        self.statement_deadline = deadline;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    /// Establish the connection, retrying transient failures with backoff.
    ///
    /// Idempotent: an already-connected manager returns immediately, and a
    /// caller arriving while another connect is in flight waits for that
    /// attempt rather than starting its own.
    pub async fn connect(&self) -> Result<(), DbError> {
        let _guard = self.connect_lock.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let mut attempt = 0u32;
        loop {
            match self.driver.connect().await {
                Ok(conn) => {
                    *self.conn.write().await = Some(Arc::new(conn));
                    self.set_state(ConnectionState::Connected);
                    info!(attempt, "database connection established");
                    return Ok(());
                }
                Err(err) => {
                    if !self.connect_policy.should_retry(attempt, err.class()) {
                        self.set_state(ConnectionState::Failed);
                        error!(attempts = attempt + 1, error = %err, "database connect failed");
                        return Err(self.exhausted(attempt, err));
                    }
                    let delay = self.connect_policy.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "database connect failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Tear the connection down and return to `Disconnected`.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        if let Some(conn) = self.conn.write().await.take() {
            conn.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Run a statement, retrying transient failures after a reconnect.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        let mut attempt = 0u32;
        loop {
            let conn = self.current_conn().await?;
            let err = match self.with_deadline(conn.execute(sql, params)).await {
                Ok(affected) => return Ok(affected),
                Err(err) => err,
            };
            attempt = self.retry_or_bail("execute", attempt, err).await?;
        }
    }

    /// Run a statement and return its rows, retrying transient failures
    /// after a reconnect.
    pub async fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<<D::Conn as SqlConnection>::Row>, DbError> {
        let mut attempt = 0u32;
        loop {
            let conn = self.current_conn().await?;
            let err = match self.with_deadline(conn.query(sql, params)).await {
                Ok(rows) => return Ok(rows),
                Err(err) => err,
            };
            attempt = self.retry_or_bail("query", attempt, err).await?;
        }
    }

    async fn with_deadline<T>(
        &self,
        operation: impl Future<Output = Result<T, DbError>>,
    ) -> Result<T, DbError> {
        match tokio::time::timeout(self.statement_deadline, operation).await {
            Ok(result) => result,
            Err(_) => Err(DbError::Timeout(format!(
                "statement deadline of {:?} exceeded",
                self.statement_deadline
            ))),
        }
    }

    /// Trivial round-trip with a deadline. Always returns a result.
    pub async fn health_check(&self) -> Health {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.health_deadline, async {
            let conn = self.current_conn().await?;
            conn.ping().await
        })
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => Health {
                status: HealthStatus::Healthy,
                latency_ms,
                error: None,
            },
            Ok(Err(err)) => Health {
                status: HealthStatus::Unhealthy,
                latency_ms,
                error: Some(err.to_string()),
            },
            Err(_) => Health {
                status: HealthStatus::Unhealthy,
                latency_ms,
                error: Some(format!(
                    "health check deadline of {:?} exceeded",
                    self.health_deadline
                )),
            },
        }
    }

    /// Current connection, establishing one first if necessary.
    async fn current_conn(&self) -> Result<Arc<D::Conn>, DbError> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(Arc::clone(conn));
        }
        self.connect().await?;
        self.conn
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| DbError::ConnectionLost("connection closed during connect".to_string()))
    }

    /// Decide whether a failed operation gets another attempt; sleeps the
    /// backoff delay and reconnects before handing the next attempt number
    /// back.
    async fn retry_or_bail(
        &self,
        operation: &str,
        attempt: u32,
        err: DbError,
    ) -> Result<u32, DbError> {
        if !self.query_policy.should_retry(attempt, err.class()) {
            return Err(self.exhausted(attempt, err));
        }
        let delay = self.query_policy.delay_for(attempt);
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure; reconnecting and retrying"
        );
        tokio::time::sleep(delay).await;
        self.reconnect().await?;
        Ok(attempt + 1)
    }

    fn exhausted(&self, attempt: u32, err: DbError) -> DbError {
        if err.is_transient() {
            DbError::RetriesExhausted {
                attempts: attempt + 1,
                source: Box::new(err),
            }
        } else {
            err
        }
    }

    async fn reconnect(&self) -> Result<(), DbError> {
        {
            let _guard = self.connect_lock.lock().await;
            self.conn.write().await.take();
            self.set_state(ConnectionState::Disconnected);
        }
        self.connect().await
    }
}
