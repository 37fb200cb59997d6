//! HTTP-backed store client.
//!
//! Speaks the REST dialect of hosted Redis-compatible stores: each command is
//! one POST of a JSON array (`["SET", "k", "v", "EX", "60"]`) with a bearer
//! credential, answered by `{"result": ...}` or `{"error": "..."}`. The
//! client holds no connection state of its own, so arbitrarily many
//! concurrent calls from stateless processes are safe.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

use sift_core::config::RemoteStoreConfig;

use crate::error::KvError;
use crate::store::KeyValueStore;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stateless client for an HTTP key-value endpoint.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<String>,
}

impl RemoteStore {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: token.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(config: &RemoteStoreConfig) -> Self {
        Self::new(config.endpoint.clone(), config.token.clone()).with_timeout(config.timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issue one command as a single request/response.
    #[instrument(skip(self, command), fields(endpoint = %self.endpoint))]
    async fn command(&self, command: Vec<JsonValue>) -> Result<JsonValue, KvError> {
        let op = command
            .first()
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&command)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let status = status.as_u16();
            return Err(if status >= 500 || status == 429 {
                KvError::Unavailable { status, body }
            } else {
                KvError::Refused { status, body }
            });
        }

        let parsed: CommandResponse = response
            .json()
            .await
            .map_err(|e| KvError::Protocol(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(KvError::Command(error));
        }

        debug!(op = %op, "command completed");
        Ok(parsed.result.unwrap_or(JsonValue::Null))
    }
}

fn map_transport_error(err: reqwest::Error) -> KvError {
    if err.is_timeout() {
        KvError::Timeout
    } else {
        KvError::Network(err.to_string())
    }
}

/// Encode a JSON value as the string argument the wire protocol expects.
fn encode(value: &JsonValue) -> Result<JsonValue, KvError> {
    Ok(JsonValue::String(serde_json::to_string(value)?))
}

/// Decode a stored string back into the JSON value it was written as.
fn decode(raw: JsonValue) -> Option<JsonValue> {
    match raw {
        JsonValue::Null => None,
        JsonValue::String(s) => {
            Some(serde_json::from_str(&s).unwrap_or(JsonValue::String(s)))
        }
        other => Some(other),
    }
}

fn as_int(result: &JsonValue) -> Result<i64, KvError> {
    result
        .as_i64()
        .ok_or_else(|| KvError::Protocol(format!("expected integer result, got {result}")))
}

#[async_trait]
impl KeyValueStore for RemoteStore {
    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut command = vec![json!("SET"), json!(key), encode(&value)?];
        if let Some(ttl) = ttl {
            command.push(json!("EX"));
            command.push(json!(ttl.as_secs().max(1)));
        }
        self.command(command).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<JsonValue>, KvError> {
        let result = self.command(vec![json!("GET"), json!(key)]).await?;
        Ok(decode(result))
    }

    async fn del(&self, key: &str) -> Result<u64, KvError> {
        let result = self.command(vec![json!("DEL"), json!(key)]).await?;
        Ok(as_int(&result)? as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let result = self.command(vec![json!("EXISTS"), json!(key)]).await?;
        Ok(as_int(&result)? > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let result = self.command(vec![json!("INCR"), json!(key)]).await?;
        as_int(&result)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let result = self
            .command(vec![json!("EXPIRE"), json!(key), json!(ttl.as_secs().max(1))])
            .await?;
        Ok(as_int(&result)? == 1)
    }

    async fn lpush(&self, key: &str, value: JsonValue) -> Result<u64, KvError> {
        let result = self
            .command(vec![json!("LPUSH"), json!(key), encode(&value)?])
            .await?;
        Ok(as_int(&result)? as u64)
    }

    async fn rpop(&self, key: &str) -> Result<Option<JsonValue>, KvError> {
        let result = self.command(vec![json!("RPOP"), json!(key)]).await?;
        Ok(decode(result))
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let result = self.command(vec![json!("LLEN"), json!(key)]).await?;
        Ok(as_int(&result)? as u64)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<JsonValue>, KvError> {
        let result = self
            .command(vec![json!("LRANGE"), json!(key), json!(start), json!(stop)])
            .await?;
        let items = result
            .as_array()
            .ok_or_else(|| KvError::Protocol(format!("expected array result, got {result}")))?;
        Ok(items.iter().filter_map(|v| decode(v.clone())).collect())
    }

    async fn hset(&self, key: &str, field: &str, value: JsonValue) -> Result<(), KvError> {
        self.command(vec![json!("HSET"), json!(key), json!(field), encode(&value)?])
            .await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<JsonValue>, KvError> {
        let result = self
            .command(vec![json!("HGET"), json!(key), json!(field)])
            .await?;
        Ok(decode(result))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, JsonValue>, KvError> {
        let result = self.command(vec![json!("HGETALL"), json!(key)]).await?;
        match result {
            // Flat [field, value, field, value] array.
            JsonValue::Array(items) => {
                let mut map = HashMap::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                    let field = field
                        .as_str()
                        .ok_or_else(|| {
                            KvError::Protocol(format!("expected string field, got {field}"))
                        })?
                        .to_string();
                    if let Some(value) = decode(value) {
                        map.insert(field, value);
                    }
                }
                Ok(map)
            }
            JsonValue::Object(entries) => Ok(entries
                .into_iter()
                .filter_map(|(field, value)| decode(value).map(|v| (field, v)))
                .collect()),
            JsonValue::Null => Ok(HashMap::new()),
            other => Err(KvError::Protocol(format!(
                "expected hash result, got {other}"
            ))),
        }
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<u64, KvError> {
        let result = self
            .command(vec![json!("HDEL"), json!(key), json!(field)])
            .await?;
        Ok(as_int(&result)? as u64)
    }

    async fn ping(&self) -> Result<(), KvError> {
        self.command(vec![json!("PING")]).await?;
        Ok(())
    }
}
