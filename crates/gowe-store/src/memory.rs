//! In-memory `Store`, mirroring
//! `durable::persistence::memory::InMemoryWorkflowEventStore`'s
//! `parking_lot::RwLock<HashMap<...>>` shape. Used by engine integration
//! tests and for local development without Postgres.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use gowe_core::{Submission, SubmissionState, Task, TaskState, Worker, WorkerState, Workflow};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{ClaimedTask, Store};

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, Workflow>,
    submissions: HashMap<Uuid, Submission>,
    tasks: HashMap<Uuid, Task>,
    workers: HashMap<Uuid, Worker>,
}

/// A `Store` backed entirely by in-process `HashMap`s.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_workflow(&self, workflow: Workflow) -> StoreResult<Workflow> {
        let mut inner = self.inner.write();
        inner.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow> {
        self.inner
            .read()
            .workflows
            .get(&id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(id))
    }

    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>> {
        Ok(self.inner.read().workflows.values().cloned().collect())
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.workflows.remove(&id).is_none() {
            return Err(StoreError::WorkflowNotFound(id));
        }
        Ok(())
    }

    async fn count_submissions_for_workflow(&self, workflow_id: Uuid) -> StoreResult<i64> {
        let inner = self.inner.read();
        Ok(inner
            .submissions
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .count() as i64)
    }

    async fn create_submission(&self, submission: Submission) -> StoreResult<Submission> {
        let mut inner = self.inner.write();
        inner.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Submission> {
        self.inner
            .read()
            .submissions
            .get(&id)
            .cloned()
            .ok_or(StoreError::SubmissionNotFound(id))
    }

    async fn update_submission(&self, submission: Submission) -> StoreResult<Submission> {
        let mut inner = self.inner.write();
        if !inner.submissions.contains_key(&submission.id) {
            return Err(StoreError::SubmissionNotFound(submission.id));
        }
        inner.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn list_submissions(&self) -> StoreResult<Vec<Submission>> {
        Ok(self.inner.read().submissions.values().cloned().collect())
    }

    async fn list_submissions_by_state(&self, state: SubmissionState) -> StoreResult<Vec<Submission>> {
        Ok(self
            .inner
            .read()
            .submissions
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect())
    }

    async fn create_task(&self, task: Task) -> StoreResult<Task> {
        let mut inner = self.inner.write();
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Task> {
        self.inner.read().tasks.get(&id).cloned().ok_or(StoreError::TaskNotFound(id))
    }

    async fn update_task(&self, task: Task) -> StoreResult<Task> {
        let mut inner = self.inner.write();
        if !inner.tasks.contains_key(&task.id) {
            return Err(StoreError::TaskNotFound(task.id));
        }
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn list_tasks_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Task>> {
        Ok(self
            .inner
            .read()
            .tasks
            .values()
            .filter(|t| t.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn list_tasks_by_state(&self, state: TaskState) -> StoreResult<Vec<Task>> {
        Ok(self
            .inner
            .read()
            .tasks
            .values()
            .filter(|t| t.state == state)
            .cloned()
            .collect())
    }

    async fn list_active_tasks_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Task>> {
        Ok(self
            .inner
            .read()
            .tasks
            .values()
            .filter(|t| t.submission_id == submission_id && !t.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn upsert_worker(&self, worker: Worker) -> StoreResult<Worker> {
        let mut inner = self.inner.write();
        inner.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker> {
        self.inner.read().workers.get(&id).cloned().ok_or(StoreError::WorkerNotFound(id))
    }

    async fn list_workers_by_state(&self, state: WorkerState) -> StoreResult<Vec<Worker>> {
        Ok(self
            .inner
            .read()
            .workers
            .values()
            .filter(|w| w.state == state)
            .cloned()
            .collect())
    }

    async fn delete_worker(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.workers.remove(&id).is_none() {
            return Err(StoreError::WorkerNotFound(id));
        }
        Ok(())
    }

    async fn claim_task_for_worker(
        &self,
        worker_id: Uuid,
        _capabilities: &[String],
    ) -> StoreResult<Option<ClaimedTask>> {
        let mut inner = self.inner.write();

        if !inner.workers.contains_key(&worker_id) {
            return Err(StoreError::WorkerNotFound(worker_id));
        }

        let candidate_id = inner
            .tasks
            .values()
            .filter(|t| {
                t.state == TaskState::Scheduled
                    && t.executor_type == gowe_core::ExecutorType::Worker
            })
            .min_by_key(|t| t.created_at)
            .map(|t| t.id);

        let Some(task_id) = candidate_id else {
            return Ok(None);
        };

        let now = Utc::now();
        let task = inner.tasks.get_mut(&task_id).expect("task vanished under lock");
        task.transition_to(TaskState::Running, now)
            .expect("scheduled->running is always legal");
        task.executor_handle = Some(worker_id.to_string());

        let worker = inner.workers.get_mut(&worker_id).expect("worker vanished under lock");
        worker.state = WorkerState::Busy;
        worker.current_task_id = Some(task_id);

        Ok(Some(ClaimedTask {
            task: task.clone(),
            worker_id,
        }))
    }

    async fn list_stale_workers(&self, ttl: chrono::Duration) -> StoreResult<Vec<Worker>> {
        let now = Utc::now();
        Ok(self
            .inner
            .read()
            .workers
            .values()
            .filter(|w| w.state != WorkerState::Offline && w.is_expired(now, ttl))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gowe_core::ExecutorType;
    use serde_json::Value;

    fn sample_worker() -> Worker {
        let now = Utc::now();
        Worker {
            id: Uuid::now_v7(),
            name: "w1".into(),
            host: "127.0.0.1".into(),
            group: "default".into(),
            runtime_tag: "bare".into(),
            capabilities: vec![],
            state: WorkerState::Idle,
            current_task_id: None,
            registered_at: now,
            last_heartbeat_at: now,
        }
    }

    fn sample_task(executor_type: ExecutorType, state: TaskState) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            step_id: "step1".into(),
            depends_on: vec![],
            state,
            executor_type,
            executor_handle: None,
            resolved_inputs: Value::Null,
            outputs: Value::Null,
            stdout: None,
            stderr: None,
            retry_count: 0,
            max_retries: 3,
            created_at: now,
            updated_at: now,
            last_error: None,
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn delete_worker_removes_registration() {
        let store = InMemoryStore::new();
        let worker = store.upsert_worker(sample_worker()).await.unwrap();
        store.delete_worker(worker.id).await.unwrap();
        assert!(matches!(store.get_worker(worker.id).await, Err(StoreError::WorkerNotFound(_))));
        assert!(matches!(store.delete_worker(worker.id).await, Err(StoreError::WorkerNotFound(_))));
    }

    #[tokio::test]
    async fn list_submissions_returns_every_state() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for state in [SubmissionState::Queued, SubmissionState::Running] {
            store
                .create_submission(Submission {
                    id: Uuid::now_v7(),
                    workflow_id: Uuid::now_v7(),
                    workflow_name: "wf".into(),
                    state,
                    inputs: Value::Null,
                    outputs: Value::Null,
                    labels: Default::default(),
                    submitted_by: "tester".into(),
                    credential: None,
                    credential_expires_at: None,
                    created_at: now,
                    updated_at: now,
                    finished_at: None,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.list_submissions().await.unwrap().len(), 2);
        assert_eq!(
            store.list_submissions_by_state(SubmissionState::Queued).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn claim_task_for_worker_assigns_oldest_scheduled_worker_task() {
        let store = InMemoryStore::new();
        let worker = store.upsert_worker(sample_worker()).await.unwrap();

        let local_task = sample_task(ExecutorType::Local, TaskState::Scheduled);
        store.create_task(local_task).await.unwrap();

        let worker_task = sample_task(ExecutorType::Worker, TaskState::Scheduled);
        let worker_task_id = worker_task.id;
        store.create_task(worker_task).await.unwrap();

        let claimed = store
            .claim_task_for_worker(worker.id, &[])
            .await
            .unwrap()
            .expect("a worker-type task should be claimable");

        assert_eq!(claimed.task.id, worker_task_id);
        assert_eq!(claimed.task.state, TaskState::Running);

        let refreshed_worker = store.get_worker(worker.id).await.unwrap();
        assert_eq!(refreshed_worker.state, WorkerState::Busy);
        assert_eq!(refreshed_worker.current_task_id, Some(worker_task_id));
    }

    #[tokio::test]
    async fn claim_returns_none_when_nothing_eligible() {
        let store = InMemoryStore::new();
        let worker = store.upsert_worker(sample_worker()).await.unwrap();
        let claimed = store.claim_task_for_worker(worker.id, &[]).await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn delete_workflow_removes_it() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let wf = Workflow {
            id: Uuid::now_v7(),
            name: "wf".into(),
            cwl_version: "v1.2".into(),
            raw_cwl: String::new(),
            inputs: vec![],
            outputs: vec![],
            steps: vec![],
            created_at: now,
        };
        store.create_workflow(wf.clone()).await.unwrap();
        store.delete_workflow(wf.id).await.unwrap();
        assert!(matches!(store.get_workflow(wf.id).await, Err(StoreError::WorkflowNotFound(_))));
    }
}
