//! The persistence seam the scheduler, resolver, and API drive through,
//! mirroring the CRUD-plus-query-by-state shape of
//! `durable::persistence::store::WorkflowEventStore`.

use async_trait::async_trait;
use gowe_core::{Submission, SubmissionState, Task, TaskState, Worker, WorkerState, Workflow};
use uuid::Uuid;

use crate::error::StoreResult;

/// A task claimed off the worker queue, paired with the worker that now
/// owns it (spec §4.6).
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub worker_id: Uuid,
}

/// Storage abstraction over Workflows, Submissions, Tasks, and Workers.
///
/// Every write that changes a row's `state` is expected to be the only
/// writer of that transition — the scheduler's six-phase tick (spec §4.2)
/// relies on each phase re-reading from storage rather than trusting
/// in-memory state carried from a prior phase, so implementations must
/// make each of these calls atomic from the caller's point of view.
#[async_trait]
pub trait Store: Send + Sync {
    // -- Workflows ---------------------------------------------------

    async fn create_workflow(&self, workflow: Workflow) -> StoreResult<Workflow>;
    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow>;
    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>>;

    /// Deletes a workflow. Callers must check `count_submissions_for_workflow`
    /// first (spec §6 `DELETE /workflows/{id}`: "remove if unreferenced").
    async fn delete_workflow(&self, id: Uuid) -> StoreResult<()>;
    async fn count_submissions_for_workflow(&self, workflow_id: Uuid) -> StoreResult<i64>;

    // -- Submissions --------------------------------------------------

    async fn create_submission(&self, submission: Submission) -> StoreResult<Submission>;
    async fn get_submission(&self, id: Uuid) -> StoreResult<Submission>;
    async fn update_submission(&self, submission: Submission) -> StoreResult<Submission>;
    async fn list_submissions(&self) -> StoreResult<Vec<Submission>>;
    async fn list_submissions_by_state(&self, state: SubmissionState) -> StoreResult<Vec<Submission>>;

    // -- Tasks ----------------------------------------------------------

    async fn create_task(&self, task: Task) -> StoreResult<Task>;
    async fn get_task(&self, id: Uuid) -> StoreResult<Task>;
    async fn update_task(&self, task: Task) -> StoreResult<Task>;
    async fn list_tasks_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Task>>;
    async fn list_tasks_by_state(&self, state: TaskState) -> StoreResult<Vec<Task>>;

    /// Every non-terminal task belonging to `submission_id`, used by the
    /// submission-cancellation cascade (spec §3 Submission CANCELLED).
    async fn list_active_tasks_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Task>>;

    // -- Workers ----------------------------------------------------------

    async fn upsert_worker(&self, worker: Worker) -> StoreResult<Worker>;
    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker>;
    async fn list_workers_by_state(&self, state: WorkerState) -> StoreResult<Vec<Worker>>;

    /// Removes a Worker's registration (spec §3 Worker "removed ... by
    /// explicit deregistration", spec.md §6 `DELETE /workers/{id}`).
    async fn delete_worker(&self, id: Uuid) -> StoreResult<()>;

    /// Atomically claims one `SCHEDULED` task whose executor type is
    /// `worker` and whose step hints are satisfied by `capabilities`,
    /// assigning it to `worker_id` and moving both rows to their
    /// in-flight states in one operation (spec §4.6). Returns `None` when
    /// no eligible task is available.
    async fn claim_task_for_worker(
        &self,
        worker_id: Uuid,
        capabilities: &[String],
    ) -> StoreResult<Option<ClaimedTask>>;

    /// Workers whose last heartbeat is older than `ttl`, for the stale
    /// sweep (spec §4.6).
    async fn list_stale_workers(&self, ttl: chrono::Duration) -> StoreResult<Vec<Worker>>;
}
