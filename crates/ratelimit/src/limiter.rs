//! Fixed-window counter with atomic increment.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use sift_core::{Classify, ErrorClass};
use sift_kv::KvError;
use sift_kv::store::KeyValueStore;

const DEFAULT_NAMESPACE: &str = "ratelimit";

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("store error: {0}")]
    Store(#[from] KvError),
}

impl Classify for RateLimitError {
    fn class(&self) -> ErrorClass {
        match self {
            RateLimitError::Store(err) => err.class(),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when denied).
    pub remaining: u32,
}

/// Fixed-window rate limiter.
///
/// The counter key is created by the first `incr` of a window and expires
/// with the window TTL; the count only ever resets through that expiry,
/// never explicitly, so there is no check-then-reset race. Known boundary
/// behavior: a caller can spend `limit` requests just before a window edge
/// and `limit` more just after it.
///
/// `incr` and `expire` are two separate remote calls. A crash between them
/// leaves an un-expiring counter, which denies that identity until the key
/// is removed; bounded by rare crash timing and accepted at this scale.
#[derive(Debug, Clone)]
pub struct RateLimiter<S: KeyValueStore> {
    store: S,
    namespace: String,
}

impl<S: KeyValueStore> RateLimiter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Count one request against `identity` and decide whether it fits the
    /// window.
    pub async fn check_and_increment(
        &self,
        identity: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, RateLimitError> {
        let key = format!("{}:{}", self.namespace, identity);

        let current = self.store.incr(&key).await?;
        if current == 1 {
            // First hit of a fresh window sets the window TTL.
            self.store.expire(&key, window).await?;
        }

        let allowed = current <= i64::from(limit);
        let remaining = (i64::from(limit) - current).max(0) as u32;
        debug!(identity, current, limit, allowed, "rate limit checked");

        Ok(RateDecision { allowed, remaining })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sift_kv::InMemoryStore;

    #[tokio::test]
    async fn allows_exactly_limit_calls_within_a_window() {
        let limiter = RateLimiter::new(InMemoryStore::new());
        let window = Duration::from_secs(60);

        for expected_remaining in (0..5).rev() {
            let decision = limiter
                .check_and_increment("user-1", 5, window)
                .await
                .unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let sixth = limiter
            .check_and_increment("user-1", 5, window)
            .await
            .unwrap();
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
    }

    #[tokio::test]
    async fn identities_do_not_share_windows() {
        let limiter = RateLimiter::new(InMemoryStore::new());
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            limiter
                .check_and_increment("user-1", 3, window)
                .await
                .unwrap();
        }
        assert!(
            !limiter
                .check_and_increment("user-1", 3, window)
                .await
                .unwrap()
                .allowed
        );

        let other = limiter
            .check_and_increment("user-2", 3, window)
            .await
            .unwrap();
        assert!(other.allowed);
        assert_eq!(other.remaining, 2);
    }

    #[tokio::test]
    async fn first_increment_sets_the_window_ttl() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = RateLimiter::new(Arc::clone(&store));
        let window = Duration::from_secs(60);

        limiter
            .check_and_increment("user-1", 5, window)
            .await
            .unwrap();

        let ttl = store.ttl("ratelimit:user-1").expect("window TTL must be set");
        assert!(ttl <= window);

        // Later increments in the same window leave the TTL in place.
        limiter
            .check_and_increment("user-1", 5, window)
            .await
            .unwrap();
        assert!(store.ttl("ratelimit:user-1").is_some());
    }

    #[tokio::test]
    async fn counter_resets_only_through_expiry() {
        let limiter = RateLimiter::new(InMemoryStore::new());
        let window = Duration::from_millis(20);

        for _ in 0..2 {
            limiter
                .check_and_increment("user-1", 2, window)
                .await
                .unwrap();
        }
        assert!(
            !limiter
                .check_and_increment("user-1", 2, window)
                .await
                .unwrap()
                .allowed
        );

        tokio::time::sleep(Duration::from_millis(40)).await;

        // A fresh window begins once the TTL fires.
        let decision = limiter
            .check_and_increment("user-1", 2, window)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }
}
