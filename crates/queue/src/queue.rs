//! The queue contract shared by both backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use sift_core::{Classify, ErrorClass};
use sift_kv::KvError;

use crate::types::{DeadJob, Job, JobId};

/// What happened to a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Requeued; available again after `delay`.
    Retried { delay: Duration },
    /// Moved to the dead-letter list. Terminal for the automatic path.
    DeadLettered,
}

/// Queue depth counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("store error: {0}")]
    Store(#[from] KvError),

    #[error("malformed job record: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("malformed queue entry: {0}")]
    Malformed(String),
}

impl Classify for QueueError {
    fn class(&self) -> ErrorClass {
        match self {
            QueueError::Store(err) => err.class(),
            QueueError::NotFound(_) | QueueError::Codec(_) | QueueError::Malformed(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

/// Job dispatch over either backend.
///
/// `dequeue` hands a given job to at most one caller (delivery is
/// at-least-once overall: a worker that crashes after `dequeue` but before
/// `ack` leaves the job record behind for redelivery tooling). `fail` owns
/// the retry bookkeeping: it increments the attempt counter, pushes
/// `available_at` forward per the backoff policy, and dead-letters the job
/// exactly when the counter reaches `max_attempts`.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    /// Next ready job, or `None` when nothing is available.
    async fn dequeue(&self) -> Result<Option<Job>, QueueError>;

    /// Mark a dequeued job as done and drop its record.
    async fn ack(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Record a failure for a dequeued job.
    async fn fail(&self, job_id: JobId, reason: &str) -> Result<FailOutcome, QueueError>;

    /// Oldest dead-lettered jobs, up to `limit`.
    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadJob>, QueueError>;

    /// Operator-facing path back to pending: reset the attempt counter and
    /// requeue. Never invoked automatically.
    async fn replay_dead_letter(&self, job_id: JobId) -> Result<Job, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

#[async_trait]
impl<Q: JobQueue + ?Sized> JobQueue for Box<Q> {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job).await
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        (**self).dequeue().await
    }

    async fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        (**self).ack(job_id).await
    }

    async fn fail(&self, job_id: JobId, reason: &str) -> Result<FailOutcome, QueueError> {
        (**self).fail(job_id, reason).await
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadJob>, QueueError> {
        (**self).list_dead_letters(limit).await
    }

    async fn replay_dead_letter(&self, job_id: JobId) -> Result<Job, QueueError> {
        (**self).replay_dead_letter(job_id).await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats().await
    }
}

#[async_trait]
impl<Q: JobQueue + ?Sized> JobQueue for Arc<Q> {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job).await
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        (**self).dequeue().await
    }

    async fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        (**self).ack(job_id).await
    }

    async fn fail(&self, job_id: JobId, reason: &str) -> Result<FailOutcome, QueueError> {
        (**self).fail(job_id, reason).await
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadJob>, QueueError> {
        (**self).list_dead_letters(limit).await
    }

    async fn replay_dead_letter(&self, job_id: JobId) -> Result<Job, QueueError> {
        (**self).replay_dead_letter(job_id).await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats().await
    }
}
