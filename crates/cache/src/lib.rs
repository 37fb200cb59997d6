//! `sift-cache` — get-or-compute caching over the remote store.
//!
//! Entries are TTL-bound JSON blobs; capacity management is entirely
//! expiry-driven (no LRU). Tags maintain a secondary tag-to-keys index so
//! many entries can be invalidated by a shared label.

pub mod cache;
pub mod error;

pub use cache::Cache;
pub use error::CacheError;
