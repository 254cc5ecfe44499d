//! Task state machine: one unit of dispatchable work for a single Step
//! within a Submission (spec §3 Task, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::executor_type::ExecutorType;

/// A Task's lifecycle state (spec §3 Task, §4.1):
/// `Pending -> Scheduled -> Queued -> Running -> {Succeeded | Failed | Skipped}`,
/// `Failed -> Retrying -> Scheduled` while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum TaskState {
    /// Dependencies not yet all satisfied.
    Pending,
    /// Dependencies satisfied; eligible for dispatch on the next tick.
    Scheduled,
    /// Dispatched to an async executor; awaiting its first non-terminal
    /// status report (spec §4.1 `SCHEDULED -> QUEUED`).
    Queued,
    /// Confirmed running by the executor (or, for the worker executor,
    /// claimed by a worker).
    Running,
    /// A dependency failed or was skipped; this task will never run.
    Skipped,
    /// Completed successfully.
    Succeeded,
    /// Completed unsuccessfully and retries remain; will be re-dispatched.
    Retrying,
    /// Completed unsuccessfully and retries are exhausted, or failed
    /// permanently (spec §4.7).
    Failed,
    /// Cancelled by submission cancellation or an operator action
    /// (supplemented, spec §3 Submission CANCELLED transition).
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Skipped | TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Whether `self -> next` is a legal transition per the state table in
    /// spec §4.1. Illegal transitions are a programming error in the
    /// scheduler, not a recoverable condition.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Scheduled, Queued)
                | (Scheduled, Running)
                | (Scheduled, Succeeded)
                | (Scheduled, Failed)
                | (Scheduled, Cancelled)
                | (Queued, Running)
                | (Queued, Succeeded)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Retrying)
                | (Retrying, Scheduled)
                | (Retrying, Cancelled)
        )
    }
}

/// Error returned by [`Task::transition_to`] on an illegal state change.
#[derive(Debug, thiserror::Error)]
#[error("illegal task transition: {from:?} -> {to:?} (task {task_id})")]
pub struct IllegalTransition {
    pub task_id: Uuid,
    pub from: TaskState,
    pub to: TaskState,
}

/// One dispatchable unit of work bound to a Step within a Submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Task {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub step_id: String,
    /// Copied from the Step at Task-creation time (Data Model invariant 3);
    /// the dependency evaluator (`dependency::evaluate`) is driven by this
    /// copy rather than re-reading the Workflow every phase-1 pass.
    pub depends_on: Vec<String>,
    pub state: TaskState,
    pub executor_type: ExecutorType,
    /// Opaque handle the executor uses to correlate later `status`/`logs`/
    /// `cancel` calls with this task (spec §4.5). Spec's `external_id`.
    pub executor_handle: Option<String>,
    /// Resolved input values, keyed by target name, including any
    /// resolver-injected reserved keys (spec §4.4).
    pub resolved_inputs: Value,
    /// Outputs produced on success, keyed by output ID (spec §4.3).
    pub outputs: Value,
    /// Captured standard output, fetched from the executor's `logs` once a
    /// terminal state is reached (spec §3 Task, §4.2 phases 2/4).
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Validates and applies a state transition, stamping `updated_at`.
    pub fn transition_to(&mut self, next: TaskState, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                task_id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = now;
        if matches!(next, TaskState::Running) && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Whether this task still has a retry budget left after a failure.
    pub fn has_retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Applies the bookkeeping side effects of moving a failed task back
    /// into the dispatch queue: increments `retry_count` and transitions
    /// `RETRYING -> SCHEDULED` (spec §4.1 side effects, §4.2 phase 3).
    /// Callers are expected to have already moved the task into
    /// `RETRYING` on a prior tick's "mark retries" phase (spec §4.2
    /// phase 6).
    pub fn prepare_retry_dispatch(&mut self, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        self.transition_to(TaskState::Scheduled, now)?;
        self.retry_count += 1;
        self.executor_handle = None;
        self.last_error = None;
        self.stdout = None;
        self.stderr = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(state: TaskState) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            step_id: "step1".into(),
            depends_on: vec![],
            state,
            executor_type: ExecutorType::Local,
            executor_handle: None,
            resolved_inputs: Value::Null,
            outputs: Value::Null,
            stdout: None,
            stderr: None,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn legal_forward_transitions_through_queued_succeed() {
        let mut t = sample(TaskState::Pending);
        t.transition_to(TaskState::Scheduled, Utc::now()).unwrap();
        t.transition_to(TaskState::Queued, Utc::now()).unwrap();
        t.transition_to(TaskState::Running, Utc::now()).unwrap();
        t.transition_to(TaskState::Succeeded, Utc::now()).unwrap();
        assert_eq!(t.state, TaskState::Succeeded);
        assert!(t.state.is_terminal());
        assert!(t.started_at.is_some());
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn sync_executor_completes_directly_from_scheduled() {
        let mut t = sample(TaskState::Scheduled);
        t.transition_to(TaskState::Succeeded, Utc::now()).unwrap();
        assert_eq!(t.state, TaskState::Succeeded);
    }

    #[test]
    fn illegal_transition_rejected() {
        let mut t = sample(TaskState::Pending);
        let err = t.transition_to(TaskState::Succeeded, Utc::now()).unwrap_err();
        assert_eq!(err.from, TaskState::Pending);
        assert_eq!(err.to, TaskState::Succeeded);
        assert_eq!(t.state, TaskState::Pending);
    }

    #[test]
    fn failed_to_retrying_requires_explicit_mark() {
        let mut t = sample(TaskState::Failed);
        t.transition_to(TaskState::Retrying, Utc::now()).unwrap();
        assert_eq!(t.state, TaskState::Retrying);
    }

    #[test]
    fn retry_dispatch_increments_count_and_clears_handle() {
        let mut t = sample(TaskState::Retrying);
        t.executor_handle = Some("handle-1".into());
        t.last_error = Some("boom".into());
        t.prepare_retry_dispatch(Utc::now()).unwrap();
        assert_eq!(t.state, TaskState::Scheduled);
        assert_eq!(t.retry_count, 1);
        assert!(t.executor_handle.is_none());
        assert!(t.last_error.is_none());
    }

    #[test]
    fn retries_remaining_respects_max() {
        let mut t = sample(TaskState::Running);
        t.retry_count = 3;
        t.max_retries = 3;
        assert!(!t.has_retries_remaining());
        t.retry_count = 2;
        assert!(t.has_retries_remaining());
    }

    #[test]
    fn cancellation_legal_from_non_terminal_states() {
        for state in [
            TaskState::Pending,
            TaskState::Scheduled,
            TaskState::Queued,
            TaskState::Running,
            TaskState::Retrying,
        ] {
            let mut t = sample(state);
            t.transition_to(TaskState::Cancelled, Utc::now()).unwrap();
            assert_eq!(t.state, TaskState::Cancelled);
        }
    }
}
