//! Channel-serialized task checkout for remote worker agents (spec §4.6).
//!
//! A single dispatcher task owns an mpsc channel of checkout requests and
//! processes them one at a time, which is how Data Model invariant 6 ("The
//! Worker Queue never emits the same Task to two checkout requests") is
//! enforced without a lock: only the dispatcher loop ever calls
//! `Store::claim_task_for_worker`, so two concurrent HTTP checkout
//! requests can never race each other for the same row. This mirrors
//! `durable::worker::pool::WorkerPool`'s single-owner-of-shared-state
//! shape, built around a channel instead of a mutex per spec §4.6/§9
//! ("this pattern ... composes naturally with ... async channel
//! semantics").

use std::sync::Arc;

use gowe_core::{Worker, WorkerState};
use gowe_store::store::{ClaimedTask, Store};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::WorkerQueueConfig;
use crate::error::SchedulerResult;

/// One worker's request to be handed its next task.
struct CheckoutRequest {
    worker_id: Uuid,
    capabilities: Vec<String>,
    reply: oneshot::Sender<SchedulerResult<Option<gowe_core::Task>>>,
}

/// Handle used by HTTP handlers to submit a checkout request to the
/// dispatcher loop. Cheap to clone; every clone shares the same channel.
#[derive(Clone)]
pub struct WorkerQueueHandle {
    requests: mpsc::Sender<CheckoutRequest>,
}

impl WorkerQueueHandle {
    /// Asks the dispatcher for the next eligible task, blocking until the
    /// dispatcher processes this request (not until a task is available —
    /// if none match, returns `Ok(None)` immediately, i.e. the spec's
    /// "204 No Content" case).
    #[instrument(skip(self))]
    pub async fn checkout(
        &self,
        worker_id: Uuid,
        capabilities: Vec<String>,
    ) -> SchedulerResult<Option<gowe_core::Task>> {
        let (reply, rx) = oneshot::channel();
        if self
            .requests
            .send(CheckoutRequest {
                worker_id,
                capabilities,
                reply,
            })
            .await
            .is_err()
        {
            warn!("worker queue dispatcher has shut down; returning no work");
            return Ok(None);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                warn!("worker queue dispatcher dropped the reply channel");
                Ok(None)
            }
        }
    }
}

/// Owns the checkout-request channel's receiving end and the periodic
/// stale-worker sweep.
pub struct WorkerQueue {
    store: Arc<dyn Store>,
    config: WorkerQueueConfig,
    requests: mpsc::Receiver<CheckoutRequest>,
    handle: WorkerQueueHandle,
}

impl WorkerQueue {
    pub fn new(store: Arc<dyn Store>, config: WorkerQueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        WorkerQueue {
            store,
            config,
            requests: rx,
            handle: WorkerQueueHandle { requests: tx },
        }
    }

    /// A cloneable handle the HTTP layer uses to submit checkout requests
    /// without owning the dispatcher loop itself.
    pub fn handle(&self) -> WorkerQueueHandle {
        self.handle.clone()
    }

    /// Runs the dispatcher loop: services one checkout request at a time
    /// and runs the stale-worker sweep on `config.heartbeat_interval`,
    /// until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut sweep = tokio::time::interval(self.config.heartbeat_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(request) = self.requests.recv() => {
                    let result = self.checkout_one(&request.worker_id, &request.capabilities).await;
                    let _ = request.reply.send(result);
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.sweep_stale_workers().await {
                        warn!(error = %e, "stale-worker sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("worker queue dispatcher shutdown requested");
                    break;
                }
            }
        }
    }

    /// Claims the oldest eligible task from the store, then verifies it
    /// against `capabilities` — the store itself is capability-blind (it
    /// only filters on state/executor_type), so a mismatch here means
    /// releasing the row back to `SCHEDULED` rather than handing a worker
    /// work it cannot run.
    async fn checkout_one(
        &self,
        worker_id: &Uuid,
        capabilities: &[String],
    ) -> SchedulerResult<Option<gowe_core::Task>> {
        let Some(claimed) = self
            .store
            .claim_task_for_worker(*worker_id, capabilities)
            .await?
        else {
            return Ok(None);
        };

        let required_image = claimed
            .task
            .resolved_inputs
            .get(gowe_core::reserved::DOCKER_IMAGE)
            .and_then(|v| v.as_str());
        let required_group = claimed
            .task
            .resolved_inputs
            .get(gowe_core::reserved::WORKER_GROUP)
            .and_then(|v| v.as_str());

        let worker = self.store.get_worker(*worker_id).await?;
        if worker_matches(&worker, required_image, required_group) {
            return Ok(Some(claimed.task));
        }

        warn!(
            worker_id = %worker_id,
            task_id = %claimed.task.id,
            "claimed task requires capability worker does not advertise; releasing"
        );
        self.release_claim(claimed).await?;
        Ok(None)
    }

    /// The store already moved this row `Scheduled -> Running`; there is
    /// no legal forward transition back, so this corrects the row
    /// directly rather than going through `Task::transition_to`.
    async fn release_claim(&self, claimed: ClaimedTask) -> SchedulerResult<()> {
        let mut task = claimed.task;
        task.state = gowe_core::TaskState::Scheduled;
        task.executor_handle = None;
        task.started_at = None;
        task.updated_at = chrono::Utc::now();
        self.store.update_task(task).await?;

        let mut worker = self.store.get_worker(claimed.worker_id).await?;
        worker.state = WorkerState::Idle;
        worker.current_task_id = None;
        self.store.upsert_worker(worker).await?;
        Ok(())
    }

    /// Workers silent past `3x` the heartbeat interval (spec §4.6) are
    /// marked offline and their in-flight task (if any) is failed —
    /// retry-eligible on the scheduler's next "mark retries" phase
    /// (spec §4.7 "stale worker (TTL exceeded) -> held task marked
    /// FAILED (retryable)").
    #[instrument(skip(self))]
    async fn sweep_stale_workers(&self) -> SchedulerResult<()> {
        let stale = self.store.list_stale_workers(self.config.stale_ttl).await?;

        for mut worker in stale {
            let held_task = worker.current_task_id;
            worker.state = WorkerState::Offline;
            worker.current_task_id = None;
            self.store.upsert_worker(worker.clone()).await?;

            if let Some(task_id) = held_task {
                self.fail_stale_task(task_id, worker.id).await?;
            }
        }

        Ok(())
    }

    async fn fail_stale_task(&self, task_id: Uuid, worker_id: Uuid) -> SchedulerResult<()> {
        let mut task = match self.store.get_task(task_id).await {
            Ok(t) => t,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "stale sweep: held task vanished");
                return Ok(());
            }
        };

        if task.state.is_terminal() {
            return Ok(());
        }

        task.last_error = Some(format!("worker {worker_id} went stale (missed heartbeat TTL)"));
        task.transition_to(gowe_core::TaskState::Failed, chrono::Utc::now())?;
        self.store.update_task(task).await?;
        Ok(())
    }
}

/// Whether `worker` may be handed `task`'s work per its advertised
/// capability labels — a required Docker image implies the worker must
/// advertise a container runtime capability, and a step restricted to a
/// group only goes to a worker registered in that group (spec §4.6
/// "matches the worker's capabilities (runtime, group, required
/// Docker/Apptainer capability if the task has a Docker image)").
pub fn worker_matches(worker: &Worker, required_docker_image: Option<&str>, required_group: Option<&str>) -> bool {
    if let Some(group) = required_group {
        if worker.group != group {
            return false;
        }
    }
    if required_docker_image.is_some() {
        return worker
            .capabilities
            .iter()
            .any(|c| c == "docker" || c == "apptainer");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gowe_core::{ExecutorType, Task, TaskState};
    use serde_json::Value;

    fn sample_worker() -> Worker {
        let now = Utc::now();
        Worker {
            id: Uuid::now_v7(),
            name: "w1".into(),
            host: "127.0.0.1".into(),
            group: "default".into(),
            runtime_tag: "docker".into(),
            capabilities: vec!["docker".into()],
            state: WorkerState::Idle,
            current_task_id: None,
            registered_at: now,
            last_heartbeat_at: now,
        }
    }

    fn sample_task(state: TaskState) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            step_id: "step1".into(),
            depends_on: vec![],
            state,
            executor_type: ExecutorType::Worker,
            executor_handle: None,
            resolved_inputs: Value::Null,
            outputs: Value::Null,
            stdout: None,
            stderr: None,
            retry_count: 0,
            max_retries: 1,
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn requires_docker_capability_for_image_tasks() {
        let mut worker = sample_worker();
        assert!(worker_matches(&worker, Some("ubuntu:22.04"), None));
        worker.capabilities.clear();
        assert!(!worker_matches(&worker, Some("ubuntu:22.04"), None));
        assert!(worker_matches(&worker, None, None));
    }

    #[test]
    fn requires_matching_group_when_step_restricts_one() {
        let worker = sample_worker();
        assert!(worker_matches(&worker, None, Some("default")));
        assert!(!worker_matches(&worker, None, Some("gpu-pool")));
    }

    #[tokio::test]
    async fn checkout_serves_requests_one_at_a_time() {
        let store = Arc::new(gowe_store::memory::InMemoryStore::new());
        let worker = store.upsert_worker(sample_worker()).await.unwrap();
        let task = sample_task(TaskState::Scheduled);
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let queue = WorkerQueue::new(store.clone(), WorkerQueueConfig::default());
        let handle = queue.handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(queue.run(shutdown_rx));

        let claimed = handle.checkout(worker.id, vec![]).await.unwrap();
        assert_eq!(claimed.unwrap().id, task_id);

        let nothing_left = handle.checkout(worker.id, vec![]).await.unwrap();
        assert!(nothing_left.is_none());

        shutdown_tx.send(true).unwrap();
        dispatcher.await.unwrap();
    }

    #[tokio::test]
    async fn stale_worker_sweep_fails_its_held_task() {
        let store = Arc::new(gowe_store::memory::InMemoryStore::new());
        let mut worker = sample_worker();
        worker.last_heartbeat_at = Utc::now() - chrono::Duration::hours(1);
        let task = sample_task(TaskState::Running);
        let task_id = task.id;
        worker.current_task_id = Some(task_id);
        let worker = store.upsert_worker(worker).await.unwrap();
        store.create_task(task).await.unwrap();

        let mut config = WorkerQueueConfig::default();
        config.stale_ttl = chrono::Duration::seconds(1);

        let queue = WorkerQueue::new(store.clone(), config);
        queue.sweep_stale_workers().await.unwrap();

        let refreshed = store.get_task(task_id).await.unwrap();
        assert_eq!(refreshed.state, TaskState::Failed);
        let refreshed_worker = store.get_worker(worker.id).await.unwrap();
        assert_eq!(refreshed_worker.state, WorkerState::Offline);
    }
}
