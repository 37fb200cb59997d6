//! Generic relational-store contract.
//!
//! The manager consumes the database exclusively through these traits, so
//! the layer stays free of SQL semantics and the manager can be exercised
//! against a test double.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::DbError;

/// Typed statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
    Null,
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        SqlParam::Int(value as i64)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Float(value)
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        SqlParam::Bool(value)
    }
}

impl From<Uuid> for SqlParam {
    fn from(value: Uuid) -> Self {
        SqlParam::Uuid(value)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(value: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(value)
    }
}

impl From<JsonValue> for SqlParam {
    fn from(value: JsonValue) -> Self {
        SqlParam::Json(value)
    }
}

/// Opens connections. One driver instance backs one managed handle.
#[async_trait]
pub trait SqlDriver: Send + Sync + 'static {
    type Conn: SqlConnection;

    async fn connect(&self) -> Result<Self::Conn, DbError>;
}

/// An established connection (or pool of them).
#[async_trait]
pub trait SqlConnection: Send + Sync + 'static {
    type Row: Send + 'static;

    /// Run a statement; returns the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError>;

    /// Run a statement; returns the result rows.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Self::Row>, DbError>;

    /// Trivial round-trip used by the health check.
    async fn ping(&self) -> Result<(), DbError>;

    async fn close(&self);
}
