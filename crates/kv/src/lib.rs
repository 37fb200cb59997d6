//! `sift-kv` — remote key-value store client.
//!
//! Every operation is a single HTTP request/response against a hosted
//! Redis-compatible REST endpoint; there is no persistent socket, which is
//! what makes this layer safe inside short-lived serverless invocations.
//! Retrying is deliberately left to callers.

pub mod error;
pub mod memory;
pub mod remote;
pub mod store;

pub use error::KvError;
pub use memory::InMemoryStore;
pub use remote::RemoteStore;
pub use store::{KeyValueStore, KeyValueStoreExt};
