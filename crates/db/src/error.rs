//! Database error taxonomy.

use thiserror::Error;

use sift_core::{Classify, ErrorClass};

/// Database-layer error with a machine-readable retry classification.
#[derive(Debug, Error)]
pub enum DbError {
    /// Host unreachable (DNS, refused, TLS, I/O).
    #[error("cannot reach server: {0}")]
    Unreachable(String),

    /// An established connection dropped mid-flight.
    #[error("connection terminated: {0}")]
    ConnectionLost(String),

    /// A caller-supplied deadline or pool acquire timeout elapsed.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server rejected the statement itself.
    #[error("query rejected: {0}")]
    Query(String),

    /// The retry budget was spent; wraps the last transient failure.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },
}

impl Classify for DbError {
    fn class(&self) -> ErrorClass {
        match self {
            DbError::Unreachable(_) | DbError::ConnectionLost(_) | DbError::Timeout(_) => {
                ErrorClass::Transient
            }
            DbError::Auth(_) | DbError::Query(_) => ErrorClass::Permanent,
            // The underlying condition keeps its class; the budget for
            // retrying it here is already spent.
            DbError::RetriesExhausted { source, .. } => source.class(),
        }
    }
}
