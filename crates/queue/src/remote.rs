//! Remote-list queue backend for serverless deployments.
//!
//! All state lives in the remote store, reachable by any stateless process:
//! pending job ids in a list (`lpush`/`rpop`), full job records in a hash
//! keyed by id, dead-lettered records in a second list. `rpop` is a single
//! atomic remote operation, so a given job is handed to at most one worker.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use sift_core::RetryPolicy;
use sift_kv::store::KeyValueStore;

use crate::queue::{FailOutcome, JobQueue, QueueError, QueueStats};
use crate::types::{DeadJob, Job, JobId};

const DEFAULT_NAMESPACE: &str = "sift:queue";

#[derive(Debug, Clone)]
pub struct RemoteListQueue<S: KeyValueStore> {
    store: S,
    namespace: String,
    policy: RetryPolicy,
}

impl<S: KeyValueStore> RemoteListQueue<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.namespace)
    }

    fn jobs_key(&self) -> String {
        format!("{}:jobs", self.namespace)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.namespace)
    }

    async fn load_job(&self, id: &str) -> Result<Option<Job>, QueueError> {
        match self.store.hget(&self.jobs_key(), id).await? {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> JobQueue for RemoteListQueue<S> {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let id = job.id;
        self.store
            .hset(&self.jobs_key(), &id.to_string(), serde_json::to_value(&job)?)
            .await?;
        self.store
            .lpush(&self.pending_key(), json!(id.to_string()))
            .await?;
        debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let Some(entry) = self.store.rpop(&self.pending_key()).await? else {
            return Ok(None);
        };
        let JsonValue::String(id) = entry else {
            return Err(QueueError::Malformed(format!(
                "pending entry is not a job id: {entry}"
            )));
        };

        let Some(job) = self.load_job(&id).await? else {
            // Record already acked or replaced; skip the orphaned id.
            return Ok(None);
        };

        if !job.is_ready() {
            // Not yet available; put it back for a later poll.
            self.store.lpush(&self.pending_key(), json!(id)).await?;
            return Ok(None);
        }

        Ok(Some(job))
    }

    async fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        let removed = self
            .store
            .hdel(&self.jobs_key(), &job_id.to_string())
            .await?;
        if removed == 0 {
            return Err(QueueError::NotFound(job_id));
        }
        Ok(())
    }

    async fn fail(&self, job_id: JobId, reason: &str) -> Result<FailOutcome, QueueError> {
        let id = job_id.to_string();
        let mut job = self
            .load_job(&id)
            .await?
            .ok_or(QueueError::NotFound(job_id))?;

        let delay = self.policy.delay_for(job.attempt);
        job.attempt += 1;

        if job.attempt >= job.max_attempts {
            warn!(job_id = %job.id, attempts = job.attempt, reason, "job dead-lettered");
            let dead = DeadJob::new(job, reason);
            self.store
                .lpush(&self.dead_key(), serde_json::to_value(&dead)?)
                .await?;
            self.store.hdel(&self.jobs_key(), &id).await?;
            Ok(FailOutcome::DeadLettered)
        } else {
            job.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            debug!(
                job_id = %job.id,
                attempt = job.attempt,
                delay_ms = delay.as_millis() as u64,
                reason,
                "job requeued for retry"
            );
            self.store
                .hset(&self.jobs_key(), &id, serde_json::to_value(&job)?)
                .await?;
            self.store.lpush(&self.pending_key(), json!(id)).await?;
            Ok(FailOutcome::Retried { delay })
        }
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadJob>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // lpush puts the newest entry at the head; the oldest live at the
        // tail, so read the tail slice and flip it.
        let entries = self
            .store
            .lrange(&self.dead_key(), -(limit as i64), -1)
            .await?;
        entries
            .into_iter()
            .rev()
            .map(|entry| serde_json::from_value(entry).map_err(QueueError::from))
            .collect()
    }

    async fn replay_dead_letter(&self, job_id: JobId) -> Result<Job, QueueError> {
        let entries = self.store.lrange(&self.dead_key(), 0, -1).await?;

        let mut found: Option<DeadJob> = None;
        let mut keep: Vec<JsonValue> = Vec::with_capacity(entries.len());
        for entry in entries {
            let dead: DeadJob = serde_json::from_value(entry.clone())?;
            if found.is_none() && dead.job.id == job_id {
                found = Some(dead);
            } else {
                keep.push(entry);
            }
        }
        let dead = found.ok_or(QueueError::NotFound(job_id))?;

        // Rebuild the dead-letter list without the replayed entry. Iterating
        // in reverse restores the original order under lpush.
        self.store.del(&self.dead_key()).await?;
        for entry in keep.iter().rev() {
            self.store.lpush(&self.dead_key(), entry.clone()).await?;
        }

        let mut job = dead.job;
        job.attempt = 0;
        job.available_at = Utc::now();
        self.store
            .hset(
                &self.jobs_key(),
                &job.id.to_string(),
                serde_json::to_value(&job)?,
            )
            .await?;
        self.store
            .lpush(&self.pending_key(), json!(job.id.to_string()))
            .await?;
        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let pending = self.store.llen(&self.pending_key()).await?;
        let dead_lettered = self.store.llen(&self.dead_key()).await?;
        let records = self.store.hgetall(&self.jobs_key()).await?.len() as u64;
        Ok(QueueStats {
            pending,
            // Every pending id also has a record; the rest are in flight.
            in_flight: records.saturating_sub(pending),
            dead_lettered,
        })
    }
}
