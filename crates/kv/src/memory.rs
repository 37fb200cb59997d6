//! In-memory store for tests and single-process development.
//!
//! Implements the same trait as [`crate::RemoteStore`] over a process-local
//! map with lazy TTL expiry. Entries past their deadline are treated as
//! absent on read and purged on the next write to the key.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::KvError;
use crate::store::KeyValueStore;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
enum Stored {
    Scalar(JsonValue),
    List(VecDeque<JsonValue>),
    Hash(HashMap<String, JsonValue>),
}

impl Entry {
    fn scalar(value: JsonValue, ttl: Option<Duration>) -> Self {
        Self {
            value: Stored::Scalar(value),
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

fn wrong_type() -> KvError {
    KvError::Command(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    )
}

/// Purge the entry if it has expired.
fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    if entries.get(key).is_some_and(Entry::expired) {
        entries.remove(key);
    }
}

fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
    entries.get(key).filter(|e| !e.expired())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL of a key, if any. Dev/test utility.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.read().unwrap();
        live(&entries, key)?
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(key.to_string(), Entry::scalar(value, ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<JsonValue>, KvError> {
        let entries = self.entries.read().unwrap();
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Stored::Scalar(value) => Ok(Some(value.clone())),
                _ => Err(wrong_type()),
            },
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<u64, KvError> {
        let mut entries = self.entries.write().unwrap();
        purge_expired(&mut entries, key);
        Ok(u64::from(entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let entries = self.entries.read().unwrap();
        Ok(live(&entries, key).is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut entries = self.entries.write().unwrap();
        purge_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::scalar(JsonValue::from(0), None));
        match &mut entry.value {
            Stored::Scalar(value) => {
                let current = value
                    .as_i64()
                    .ok_or_else(|| KvError::Command("ERR value is not an integer".to_string()))?;
                let next = current + 1;
                *value = JsonValue::from(next);
                Ok(next)
            }
            _ => Err(wrong_type()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let mut entries = self.entries.write().unwrap();
        purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn lpush(&self, key: &str, value: JsonValue) -> Result<u64, KvError> {
        let mut entries = self.entries.write().unwrap();
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Stored::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Stored::List(items) => {
                items.push_front(value);
                Ok(items.len() as u64)
            }
            _ => Err(wrong_type()),
        }
    }

    async fn rpop(&self, key: &str) -> Result<Option<JsonValue>, KvError> {
        let mut entries = self.entries.write().unwrap();
        purge_expired(&mut entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let (popped, now_empty) = match &mut entry.value {
            Stored::List(items) => {
                let popped = items.pop_back();
                (popped, items.is_empty())
            }
            _ => return Err(wrong_type()),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let entries = self.entries.read().unwrap();
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Stored::List(items) => Ok(items.len() as u64),
                _ => Err(wrong_type()),
            },
            None => Ok(0),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<JsonValue>, KvError> {
        let entries = self.entries.read().unwrap();
        let Some(entry) = live(&entries, key) else {
            return Ok(Vec::new());
        };
        let Stored::List(items) = &entry.value else {
            return Err(wrong_type());
        };

        let len = items.len() as i64;
        let normalize = |i: i64| if i < 0 { len + i } else { i };
        let start = normalize(start).max(0);
        let stop = normalize(stop).min(len - 1);
        if start > stop || len == 0 {
            return Ok(Vec::new());
        }

        Ok(items
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn hset(&self, key: &str, field: &str, value: JsonValue) -> Result<(), KvError> {
        let mut entries = self.entries.write().unwrap();
        purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Stored::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Stored::Hash(fields) => {
                fields.insert(field.to_string(), value);
                Ok(())
            }
            _ => Err(wrong_type()),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<JsonValue>, KvError> {
        let entries = self.entries.read().unwrap();
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Stored::Hash(fields) => Ok(fields.get(field).cloned()),
                _ => Err(wrong_type()),
            },
            None => Ok(None),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, JsonValue>, KvError> {
        let entries = self.entries.read().unwrap();
        match live(&entries, key) {
            Some(entry) => match &entry.value {
                Stored::Hash(fields) => Ok(fields.clone()),
                _ => Err(wrong_type()),
            },
            None => Ok(HashMap::new()),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, KvError> {
        let mut entries = self.entries.write().unwrap();
        purge_expired(&mut entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        let (removed, now_empty) = match &mut entry.value {
            Stored::Hash(fields) => {
                let removed = fields.remove(field).is_some();
                (removed, fields.is_empty())
            }
            _ => return Err(wrong_type()),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(u64::from(removed))
    }

    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }
}
