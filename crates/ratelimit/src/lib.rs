//! `sift-ratelimit` — fixed-window request limiting over the remote store.

pub mod limiter;

pub use limiter::{RateDecision, RateLimitError, RateLimiter};
