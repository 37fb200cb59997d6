//! Job records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A pending unit of work.
///
/// `attempt` counts completed failures; the worker pushes `available_at`
/// forward on each one. Once `attempt` reaches `max_attempts` the job moves
/// to the dead-letter list as a [`DeadJob`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Kind string used to route the job to a handler.
    pub kind: String,
    pub payload: JsonValue,
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be handed to a worker.
    pub available_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: impl Into<String>, payload: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind: kind.into(),
            payload,
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: now,
            available_at: now,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay the first execution.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        self
    }

    pub fn is_ready(&self) -> bool {
        Utc::now() >= self.available_at
    }
}

/// A job that exhausted its retry budget, parked for manual inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadJob {
    pub job: Job,
    pub failure_reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadJob {
    pub fn new(job: Job, failure_reason: impl Into<String>) -> Self {
        Self {
            job,
            failure_reason: failure_reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}
