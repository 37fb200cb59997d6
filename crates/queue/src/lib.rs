//! `sift-queue` — dual-mode job dispatch.
//!
//! One `JobQueue` contract, two interchangeable backends selected at
//! construction time: an in-process queue for long-lived workers and a
//! remote-list queue reachable from stateless serverless invocations. Both
//! share the same backoff policy, so retry timing is observably consistent
//! regardless of deployment mode.

pub mod memory;
pub mod queue;
pub mod remote;
pub mod types;
pub mod worker;

pub use memory::InProcessQueue;
pub use queue::{FailOutcome, JobQueue, QueueError, QueueStats};
pub use remote::RemoteListQueue;
pub use types::{DeadJob, Job, JobId};
pub use worker::{JobOutcome, Processed, Worker, WorkerConfig, WorkerHandle, WorkerStats};

use sift_core::QueueMode;
use sift_core::config::QueueConfig;
use sift_kv::store::KeyValueStore;

/// Build the queue backend selected by configuration.
///
/// The choice happens once here; call sites hold the trait object and never
/// branch on the mode again. The store argument is only consulted in
/// remote-list mode.
pub fn queue_from_config<S>(config: &QueueConfig, store: S) -> Box<dyn JobQueue>
where
    S: KeyValueStore + 'static,
{
    match config.mode {
        QueueMode::InProcess => Box::new(InProcessQueue::new()),
        QueueMode::RemoteList => {
            Box::new(RemoteListQueue::new(store).with_namespace(config.namespace.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sift_kv::InMemoryStore;

    fn config(mode: QueueMode) -> QueueConfig {
        QueueConfig {
            mode,
            max_attempts: 3,
            namespace: "test:queue".to_string(),
        }
    }

    #[tokio::test]
    async fn config_selects_the_backend_once() {
        for mode in [QueueMode::InProcess, QueueMode::RemoteList] {
            let queue = queue_from_config(&config(mode), InMemoryStore::new());

            let id = queue
                .enqueue(Job::new("classify", json!({"mode": format!("{mode:?}")})))
                .await
                .unwrap();
            let job = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(job.id, id);
            queue.ack(id).await.unwrap();
        }
    }
}
