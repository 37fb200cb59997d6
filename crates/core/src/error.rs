//! Failure classification.

use serde::{Deserialize, Serialize};

/// How a failure is expected to behave when the operation is tried again.
///
/// Classification happens where a provider error is mapped into one of our
/// error enums, never by matching message text at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Expected to resolve itself on retry (unreachable host, reset, timeout).
    Transient,
    /// Will recur identically on retry (bad credentials, malformed input).
    Permanent,
}

impl ErrorClass {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

/// Errors that carry a retry classification.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
