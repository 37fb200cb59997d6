//! Store abstraction shared by the HTTP client and the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::KvError;

/// Key-value store primitives.
///
/// The surface mirrors what any GET/SET/INCR/EXPIRE/LPUSH/RPOP/HSET provider
/// exposes; values are JSON. Note that `incr` and `expire` are two separate
/// calls: callers that need a fresh counter with a TTL must call `expire`
/// immediately after the `incr` that returned 1.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>)
    -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<JsonValue>, KvError>;

    /// Delete a key; returns the number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> Result<u64, KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;

    /// Atomically increment an integer counter, creating it at 1.
    async fn incr(&self, key: &str) -> Result<i64, KvError>;

    /// Set a TTL on an existing key; false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Push onto the head of a list; returns the new length.
    async fn lpush(&self, key: &str, value: JsonValue) -> Result<u64, KvError>;

    /// Pop from the tail of a list (single atomic remote operation).
    async fn rpop(&self, key: &str) -> Result<Option<JsonValue>, KvError>;

    async fn llen(&self, key: &str) -> Result<u64, KvError>;

    /// Inclusive range, Redis index semantics (negative counts from the tail).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<JsonValue>, KvError>;

    async fn hset(&self, key: &str, field: &str, value: JsonValue) -> Result<(), KvError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<JsonValue>, KvError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, JsonValue>, KvError>;

    /// Delete a hash field; returns the number of fields removed.
    async fn hdel(&self, key: &str, field: &str) -> Result<u64, KvError>;

    /// Liveness round-trip.
    async fn ping(&self) -> Result<(), KvError>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        (**self).set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<JsonValue>, KvError> {
        (**self).get(key).await
    }

    async fn del(&self, key: &str) -> Result<u64, KvError> {
        (**self).del(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        (**self).exists(key).await
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        (**self).incr(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        (**self).expire(key, ttl).await
    }

    async fn lpush(&self, key: &str, value: JsonValue) -> Result<u64, KvError> {
        (**self).lpush(key, value).await
    }

    async fn rpop(&self, key: &str) -> Result<Option<JsonValue>, KvError> {
        (**self).rpop(key).await
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        (**self).llen(key).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<JsonValue>, KvError> {
        (**self).lrange(key, start, stop).await
    }

    async fn hset(&self, key: &str, field: &str, value: JsonValue) -> Result<(), KvError> {
        (**self).hset(key, field, value).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<JsonValue>, KvError> {
        (**self).hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, JsonValue>, KvError> {
        (**self).hgetall(key).await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, KvError> {
        (**self).hdel(key, field).await
    }

    async fn ping(&self) -> Result<(), KvError> {
        (**self).ping().await
    }
}

/// Typed (de)serialization helpers over any [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn set_json<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<(), KvError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl).await
    }

    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, KvError>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
