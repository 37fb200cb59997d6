//! Cache error type.

use thiserror::Error;

use sift_core::{Classify, ErrorClass};
use sift_kv::KvError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] KvError),

    #[error("compute failed: {0}")]
    Compute(anyhow::Error),
}

impl Classify for CacheError {
    fn class(&self) -> ErrorClass {
        match self {
            CacheError::Store(err) => err.class(),
            CacheError::Compute(_) => ErrorClass::Permanent,
        }
    }
}
