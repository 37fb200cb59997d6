//! Worker runner: polls a queue, routes jobs to handlers, records outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::queue::{FailOutcome, JobQueue, QueueError};
use crate::types::Job;

/// What a handler reports back for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure(String),
}

/// Handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobOutcome + Send + Sync>;

/// What happened to one processed job, for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Succeeded,
    Retried,
    DeadLettered,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll when the queue is empty.
    pub poll_interval: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            name: "queue-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Worker runtime counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

/// Routes dequeued jobs to registered handlers.
///
/// Works over either queue backend. Long-lived deployments `spawn` the
/// polling loop; stateless invocations call `run_once`/`drain` directly.
pub struct Worker<Q: JobQueue> {
    queue: Q,
    handlers: HashMap<String, JobHandler>,
}

impl<Q: JobQueue> Worker<Q> {
    pub fn new(queue: Q) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job kind. `"*"` catches everything without
    /// a dedicated handler.
    pub fn register_handler<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobOutcome + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
    }

    fn handler_for(&self, kind: &str) -> Option<&JobHandler> {
        self.handlers.get(kind).or_else(|| self.handlers.get("*"))
    }

    /// Dequeue and process at most one job. `Ok(None)` means the queue had
    /// nothing ready.
    pub async fn run_once(&self) -> Result<Option<Processed>, QueueError> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(None);
        };
        Ok(Some(self.process(job).await?))
    }

    /// Process jobs until the queue is empty or `max_jobs` is reached.
    /// Returns the number processed. This is the serverless entry point:
    /// each invocation drains what it can and exits.
    pub async fn drain(&self, max_jobs: usize) -> Result<usize, QueueError> {
        let mut processed = 0;
        while processed < max_jobs {
            if self.run_once().await?.is_none() {
                break;
            }
            processed += 1;
        }
        Ok(processed)
    }

    async fn process(&self, job: Job) -> Result<Processed, QueueError> {
        let outcome = match self.handler_for(&job.kind) {
            Some(handler) => handler(&job),
            None => {
                warn!(job_id = %job.id, kind = %job.kind, "no handler registered for job");
                JobOutcome::Failure(format!("no handler for job kind {:?}", job.kind))
            }
        };

        match outcome {
            JobOutcome::Success => {
                self.queue.ack(job.id).await?;
                debug!(job_id = %job.id, kind = %job.kind, "job completed");
                Ok(Processed::Succeeded)
            }
            JobOutcome::Failure(reason) => match self.queue.fail(job.id, &reason).await? {
                FailOutcome::Retried { delay } => {
                    debug!(
                        job_id = %job.id,
                        delay_ms = delay.as_millis() as u64,
                        reason,
                        "job failed; retry scheduled"
                    );
                    Ok(Processed::Retried)
                }
                FailOutcome::DeadLettered => {
                    warn!(job_id = %job.id, reason, "job failed; dead-lettered");
                    Ok(Processed::DeadLettered)
                }
            },
        }
    }

    /// Run the polling loop as a background task.
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle
    where
        Q: 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let task_stats = Arc::clone(&stats);

        let join = tokio::spawn(async move {
            info!(worker = %config.name, "queue worker started");
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.run_once().await {
                    Ok(Some(processed)) => {
                        let mut s = task_stats.lock().unwrap();
                        s.processed += 1;
                        match processed {
                            Processed::Succeeded => s.succeeded += 1,
                            Processed::Retried => s.failed += 1,
                            Processed::DeadLettered => {
                                s.failed += 1;
                                s.dead_lettered += 1;
                            }
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(config.poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                    Err(err) => {
                        error!(worker = %config.name, error = %err, "queue poll failed");
                        tokio::select! {
                            _ = tokio::time::sleep(config.poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                }
            }
            info!(worker = %config.name, "queue worker stopped");
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use sift_core::RetryPolicy;

    use crate::memory::InProcessQueue;
    use crate::queue::JobQueue;

    fn immediate_queue() -> InProcessQueue {
        InProcessQueue::new().with_policy(RetryPolicy::default().with_base_delay(Duration::ZERO))
    }

    #[tokio::test]
    async fn successful_jobs_are_acked() {
        let queue = immediate_queue();
        queue
            .enqueue(Job::new("classify", json!({})))
            .await
            .unwrap();

        let mut worker = Worker::new(queue);
        worker.register_handler("classify", |_job| JobOutcome::Success);

        assert_eq!(worker.run_once().await.unwrap(), Some(Processed::Succeeded));
        let stats = worker.queue.stats().await.unwrap();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn failing_jobs_retry_then_dead_letter() {
        let queue = immediate_queue();
        queue
            .enqueue(Job::new("classify", json!({})).with_max_attempts(2))
            .await
            .unwrap();

        let mut worker = Worker::new(queue);
        worker.register_handler("classify", |_job| {
            JobOutcome::Failure("upstream timeout".to_string())
        });

        assert_eq!(worker.run_once().await.unwrap(), Some(Processed::Retried));
        assert_eq!(
            worker.run_once().await.unwrap(),
            Some(Processed::DeadLettered)
        );
        assert_eq!(worker.run_once().await.unwrap(), None);

        let dead = worker.queue.list_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].failure_reason, "upstream timeout");
    }

    #[tokio::test]
    async fn wildcard_handler_catches_unrouted_kinds() {
        let queue = immediate_queue();
        queue
            .enqueue(Job::new("anything-at-all", json!({})))
            .await
            .unwrap();

        let mut worker = Worker::new(queue);
        worker.register_handler("*", |_job| JobOutcome::Success);

        assert_eq!(worker.run_once().await.unwrap(), Some(Processed::Succeeded));
    }

    #[tokio::test]
    async fn missing_handler_fails_the_job() {
        let queue = immediate_queue();
        queue
            .enqueue(Job::new("mystery", json!({})).with_max_attempts(1))
            .await
            .unwrap();

        let worker = Worker::new(queue);

        assert_eq!(
            worker.run_once().await.unwrap(),
            Some(Processed::DeadLettered)
        );
        let dead = worker.queue.list_dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].failure_reason.contains("no handler"));
    }

    #[tokio::test]
    async fn drain_processes_up_to_the_requested_count() {
        let queue = immediate_queue();
        for n in 0..5 {
            queue
                .enqueue(Job::new("classify", json!({"n": n})))
                .await
                .unwrap();
        }

        let mut worker = Worker::new(queue);
        worker.register_handler("classify", |_job| JobOutcome::Success);

        assert_eq!(worker.drain(3).await.unwrap(), 3);
        assert_eq!(worker.drain(10).await.unwrap(), 2);
        assert_eq!(worker.drain(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_worker_processes_jobs_and_shuts_down() {
        let queue = Arc::new(immediate_queue());
        for n in 0..3 {
            queue
                .enqueue(Job::new("classify", json!({"n": n})))
                .await
                .unwrap();
        }

        let mut worker = Worker::new(Arc::clone(&queue));
        worker.register_handler("classify", |_job| JobOutcome::Success);

        let handle = worker.spawn(
            WorkerConfig::default()
                .with_name("test-worker")
                .with_poll_interval(Duration::from_millis(5)),
        );

        // The loop is eventually consistent; poll briefly until it catches up.
        for _ in 0..100 {
            if handle.stats().succeeded >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = handle.stats();
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.processed, 3);

        handle.shutdown().await;
        assert_eq!(queue.stats().await.unwrap().pending, 0);
    }
}
