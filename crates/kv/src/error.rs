//! Remote store error mapping.

use thiserror::Error;

use sift_core::{Classify, ErrorClass};

/// Remote key-value store error.
///
/// Network-level failures are transient; an explicit refusal by the store
/// (auth, malformed command) is permanent. Neither is retried here.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("store unavailable (http {status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("store refused request (http {status}): {body}")]
    Refused { status: u16, body: String },

    #[error("command rejected: {0}")]
    Command(String),

    #[error("unexpected response shape: {0}")]
    Protocol(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for KvError {
    fn class(&self) -> ErrorClass {
        match self {
            KvError::Network(_) | KvError::Timeout | KvError::Unavailable { .. } => {
                ErrorClass::Transient
            }
            KvError::Refused { .. }
            | KvError::Command(_)
            | KvError::Protocol(_)
            | KvError::Serialization(_) => ErrorClass::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_transient() {
        assert!(KvError::Network("reset".into()).is_transient());
        assert!(KvError::Timeout.is_transient());
        assert!(
            KvError::Unavailable {
                status: 503,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn refusals_are_permanent() {
        assert!(
            !KvError::Refused {
                status: 401,
                body: String::new()
            }
            .is_transient()
        );
        assert!(!KvError::Command("ERR wrong number of arguments".into()).is_transient());
    }
}
