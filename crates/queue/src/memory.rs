//! In-process queue backend for long-lived deployments.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use sift_core::RetryPolicy;

use crate::queue::{FailOutcome, JobQueue, QueueError, QueueStats};
use crate::types::{DeadJob, Job, JobId};

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<Job>,
    in_flight: HashMap<JobId, Job>,
    dead: Vec<DeadJob>,
}

/// Local concurrent queue; jobs live in process memory only.
#[derive(Debug)]
pub struct InProcessQueue {
    state: Mutex<State>,
    policy: RetryPolicy,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InProcessQueue {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let id = job.id;
        let mut state = self.state.lock().await;
        state.pending.push_back(job);
        debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<Job>, QueueError> {
        let mut state = self.state.lock().await;
        let Some(index) = state.pending.iter().position(Job::is_ready) else {
            return Ok(None);
        };
        let Some(job) = state.pending.remove(index) else {
            return Ok(None);
        };
        state.in_flight.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&job_id)
            .map(|_| ())
            .ok_or(QueueError::NotFound(job_id))
    }

    async fn fail(&self, job_id: JobId, reason: &str) -> Result<FailOutcome, QueueError> {
        let mut state = self.state.lock().await;
        let mut job = state
            .in_flight
            .remove(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;

        let delay = self.policy.delay_for(job.attempt);
        job.attempt += 1;

        if job.attempt >= job.max_attempts {
            warn!(job_id = %job.id, attempts = job.attempt, reason, "job dead-lettered");
            state.dead.push(DeadJob::new(job, reason));
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
            state.pending.push_back(job);
            Ok(FailOutcome::Retried { delay })
        }
    }

    async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadJob>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.dead.iter().take(limit).cloned().collect())
    }

    async fn replay_dead_letter(&self, job_id: JobId) -> Result<Job, QueueError> {
        let mut state = self.state.lock().await;
        let index = state
            .dead
            .iter()
            .position(|entry| entry.job.id == job_id)
            .ok_or(QueueError::NotFound(job_id))?;

        let mut job = state.dead.remove(index).job;
        job.attempt = 0;
        job.available_at = Utc::now();
        state.pending.push_back(job.clone());
        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            pending: state.pending.len() as u64,
            in_flight: state.in_flight.len() as u64,
            dead_lettered: state.dead.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn immediate_policy() -> RetryPolicy {
        RetryPolicy::default().with_base_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn jobs_dequeue_in_enqueue_order() {
        let queue = InProcessQueue::new();
        let first = queue
            .enqueue(Job::new("classify", json!({"n": 1})))
            .await
            .unwrap();
        let second = queue
            .enqueue(Job::new("classify", json!({"n": 2})))
            .await
            .unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, first);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, second);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delayed_jobs_are_skipped_until_available() {
        let queue = InProcessQueue::new();
        queue
            .enqueue(Job::new("classify", json!({})).delayed(Duration::from_secs(60)))
            .await
            .unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn fail_requeues_with_backoff_delay() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_millis(500));
        let queue = InProcessQueue::new().with_policy(policy.clone());

        let id = queue
            .enqueue(Job::new("classify", json!({})))
            .await
            .unwrap();
        queue.dequeue().await.unwrap().unwrap();

        let outcome = queue.fail(id, "upstream timeout").await.unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retried {
                delay: policy.delay_for(0)
            }
        );

        // Requeued but not yet available.
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn dead_letters_exactly_at_max_attempts() {
        let queue = InProcessQueue::new().with_policy(immediate_policy());
        let id = queue
            .enqueue(Job::new("classify", json!({})).with_max_attempts(3))
            .await
            .unwrap();

        for expected_attempt in 1..3 {
            let job = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(job.id, id);
            let outcome = queue.fail(id, "boom").await.unwrap();
            assert!(
                matches!(outcome, FailOutcome::Retried { .. }),
                "attempt {expected_attempt} must retry, not dead-letter"
            );
            assert!(queue.list_dead_letters(10).await.unwrap().is_empty());
        }

        queue.dequeue().await.unwrap().unwrap();
        let outcome = queue.fail(id, "boom").await.unwrap();
        assert_eq!(outcome, FailOutcome::DeadLettered);

        let dead = queue.list_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.id, id);
        assert_eq!(dead[0].job.attempt, 3);
        assert_eq!(dead[0].failure_reason, "boom");

        // Not in pending anymore and never auto-retried.
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.dead_lettered, 1);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_drops_the_job() {
        let queue = InProcessQueue::new();
        let id = queue
            .enqueue(Job::new("classify", json!({})))
            .await
            .unwrap();

        queue.dequeue().await.unwrap().unwrap();
        queue.ack(id).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.in_flight, 0);

        // Acking again reports the job as gone.
        assert!(matches!(
            queue.ack(id).await,
            Err(QueueError::NotFound(gone)) if gone == id
        ));
    }

    #[tokio::test]
    async fn replay_moves_a_dead_job_back_to_pending() {
        let queue = InProcessQueue::new().with_policy(immediate_policy());
        let id = queue
            .enqueue(Job::new("classify", json!({})).with_max_attempts(1))
            .await
            .unwrap();

        queue.dequeue().await.unwrap().unwrap();
        assert_eq!(
            queue.fail(id, "boom").await.unwrap(),
            FailOutcome::DeadLettered
        );

        let replayed = queue.replay_dead_letter(id).await.unwrap();
        assert_eq!(replayed.attempt, 0);
        assert!(queue.list_dead_letters(10).await.unwrap().is_empty());

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, id);
    }
}
