//! Get-or-compute cache with tag-based bulk invalidation.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use sift_kv::store::{KeyValueStore, KeyValueStoreExt};

use crate::error::CacheError;

const DEFAULT_NAMESPACE: &str = "cache";

/// TTL-bound cache over any [`KeyValueStore`].
///
/// `get_or_compute` performs no cross-process locking: concurrent misses on
/// the same key may each invoke the compute function ("cache stampede").
/// That is an accepted tradeoff; last write wins and every write carries the
/// same TTL.
#[derive(Debug, Clone)]
pub struct Cache<S: KeyValueStore> {
    store: S,
    namespace: String,
}

impl<S: KeyValueStore> Cache<S> {
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

    fn entry_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.namespace, tag)
    }

    /// Read a cached value.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        Ok(self.store.get_json(&self.entry_key(key)).await?)
    }

    /// Write a value with a TTL.
    pub async fn insert<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize + Sync,
    {
        self.insert_tagged(key, value, ttl, &[]).await
    }

    /// Write a value with a TTL and attach it to the given tags.
    ///
    /// Each tag keeps a TTL-bound list of the entry keys written under it;
    /// the index entry expires alongside the data it points at.
    pub async fn insert_tagged<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<(), CacheError>
    where
        T: Serialize + Sync,
    {
        let entry_key = self.entry_key(key);
        self.store.set_json(&entry_key, value, Some(ttl)).await?;

        for tag in tags {
            let tag_key = self.tag_key(tag);
            self.store.lpush(&tag_key, json!(entry_key)).await?;
            self.store.expire(&tag_key, ttl).await?;
        }
        Ok(())
    }

    /// Read through the cache, computing and storing the value on a miss.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.get_or_compute_tagged(key, ttl, &[], compute).await
    }

    /// [`Cache::get_or_compute`] with tags attached on the write path.
    pub async fn get_or_compute_tagged<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        tags: &[&str],
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(hit) = self.get(key).await? {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        debug!(key, "cache miss; computing");
        let value = compute().await.map_err(CacheError::Compute)?;
        self.insert_tagged(key, &value, ttl, tags).await?;
        Ok(value)
    }

    /// Drop a single entry. Calling this for a missing key is a no-op.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.store.del(&self.entry_key(key)).await?;
        Ok(())
    }

    /// Drop every entry written under a tag, then the tag index itself.
    ///
    /// At-least-once: a crash between deleting the listed keys and deleting
    /// the index can leave a stale tag pointing at already-deleted keys,
    /// which later reads see as ordinary misses. Returns the number of
    /// entries deleted.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let tag_key = self.tag_key(tag);
        let keys = self.store.lrange(&tag_key, 0, -1).await?;

        let mut deleted = 0;
        for key in &keys {
            if let Some(entry_key) = key.as_str() {
                deleted += self.store.del(entry_key).await?;
            }
        }
        self.store.del(&tag_key).await?;

        debug!(tag, deleted, "tag invalidated");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde::Deserialize;
    use sift_kv::InMemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Summary {
        topic: String,
        score: i64,
    }

    fn summary() -> Summary {
        Summary {
            topic: "sentiment".to_string(),
            score: 82,
        }
    }

    fn ttl() -> Duration {
        Duration::from_secs(60)
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let cache = Cache::new(InMemoryStore::new());

        cache.insert("doc:1", &summary(), ttl()).await.unwrap();
        let loaded: Option<Summary> = cache.get("doc:1").await.unwrap();

        assert_eq!(loaded, Some(summary()));
    }

    #[tokio::test]
    async fn get_or_compute_computes_once_then_hits() {
        let cache = Cache::new(InMemoryStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value: Summary = cache
                .get_or_compute("doc:1", ttl(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(summary())
                })
                .await
                .unwrap();
            assert_eq!(value, summary());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_error_surfaces_without_caching() {
        let cache = Cache::new(InMemoryStore::new());

        let result: Result<Summary, _> = cache
            .get_or_compute("doc:1", ttl(), || async {
                Err(anyhow::anyhow!("upstream unavailable"))
            })
            .await;
        assert!(matches!(result, Err(CacheError::Compute(_))));

        let cached: Option<Summary> = cache.get("doc:1").await.unwrap();
        assert_eq!(cached, None);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = Cache::new(InMemoryStore::new());
        cache.insert("doc:1", &summary(), ttl()).await.unwrap();

        cache.invalidate("doc:1").await.unwrap();
        // Second call observes nothing and succeeds.
        cache.invalidate("doc:1").await.unwrap();

        let cached: Option<Summary> = cache.get("doc:1").await.unwrap();
        assert_eq!(cached, None);
    }

    #[tokio::test]
    async fn invalidate_by_tag_drops_only_tagged_entries() {
        let cache = Cache::new(InMemoryStore::new());

        cache
            .insert_tagged("doc:1", &summary(), ttl(), &["tenant-7"])
            .await
            .unwrap();
        cache
            .insert_tagged("doc:2", &summary(), ttl(), &["tenant-7"])
            .await
            .unwrap();
        cache.insert("doc:3", &summary(), ttl()).await.unwrap();

        let deleted = cache.invalidate_by_tag("tenant-7").await.unwrap();
        assert_eq!(deleted, 2);

        assert_eq!(cache.get::<Summary>("doc:1").await.unwrap(), None);
        assert_eq!(cache.get::<Summary>("doc:2").await.unwrap(), None);
        assert_eq!(cache.get::<Summary>("doc:3").await.unwrap(), Some(summary()));

        // The tag index is gone too; invalidating again is a no-op.
        let deleted = cache.invalidate_by_tag("tenant-7").await.unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn entries_expire_with_their_ttl() {
        let cache = Cache::new(InMemoryStore::new());

        cache
            .insert("doc:1", &summary(), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;

        let cached: Option<Summary> = cache.get("doc:1").await.unwrap();
        assert_eq!(cached, None);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_both_compute() {
        let cache = Cache::new(Arc::new(InMemoryStore::new()));
        let calls = Arc::new(AtomicU32::new(0));

        let compute = |calls: Arc<AtomicU32>| async move {
            // Yield so the second miss happens before the first write lands.
            tokio::time::sleep(Duration::from_millis(5)).await;
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(summary())
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute("doc:1", ttl(), || compute(Arc::clone(&calls))),
            cache.get_or_compute("doc:1", ttl(), || compute(Arc::clone(&calls))),
        );

        assert_eq!(a.unwrap(), summary());
        assert_eq!(b.unwrap(), summary());
        // Documented stampede window: no cross-process lock, so both
        // concurrent misses ran the compute.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
