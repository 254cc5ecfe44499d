//! The uniform contract every backend (local, container, BV-BRC, worker)
//! implements (spec §4.5), grounded on `durable::activity::Activity`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::task::Task;

/// A point-in-time read of a submitted task's executor-side status
/// (spec §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum StatusReport {
    /// Still executing; nothing actionable yet.
    InProgress,
    /// Finished successfully with the given outputs.
    Succeeded { outputs: Value, exit_code: Option<i32> },
    /// Finished unsuccessfully with a human-readable error. `retryable`
    /// reflects the tool's `temporaryFailCodes` (spec §6 "Exit code
    /// semantics"): when `false`, the scheduler should not spend the
    /// Task's retry budget on this failure.
    Failed {
        error: String,
        exit_code: Option<i32>,
        retryable: bool,
    },
}

/// Classifies a process exit code against a tool's `successCodes`/
/// `temporaryFailCodes` overrides (spec §6 "Exit code semantics"): `0`
/// succeeds unless `exit_code` is `None` (the process never reported one);
/// any other code succeeds only if `success_codes` names it. A failing
/// code is retry-eligible when `temporary_fail_codes` is empty (no
/// override declared) or names that code explicitly.
///
/// Returns `(succeeded, retryable)`; `retryable` is meaningless when
/// `succeeded` is `true`.
pub fn classify_exit_code(exit_code: Option<i32>, success_codes: &[i32], temporary_fail_codes: &[i32]) -> (bool, bool) {
    let succeeded = match exit_code {
        Some(0) => true,
        Some(code) => success_codes.contains(&code),
        None => false,
    };

    let retryable = match exit_code {
        Some(code) if !temporary_fail_codes.is_empty() => temporary_fail_codes.contains(&code),
        _ => true,
    };

    (succeeded, retryable)
}

/// Captured stdout/stderr for a task, returned on demand (spec §4.5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TaskLogs {
    pub stdout: String,
    pub stderr: String,
}

/// Failure modes a backend surfaces back to the scheduler.
///
/// This mirrors `durable::activity::ActivityError`'s retryable/permanent
/// split (spec §4.7): the scheduler only applies the Task retry budget to
/// `Transient` failures, treating `Permanent` the same as a `FAILED` with
/// zero remaining retries.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("transient executor failure: {0}")]
    Transient(String),

    #[error("permanent executor failure: {0}")]
    Permanent(String),

    #[error("no executor registered for handle {0}")]
    HandleNotFound(String),

    #[error("executor backend unavailable: {0}")]
    Unavailable(String),
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::Transient(_) | ExecutorError::Unavailable(_))
    }
}

/// The uniform interface the scheduler drives every backend through
/// (spec §4.5). Sync backends (local, container) resolve `submit`
/// immediately into a terminal `StatusReport`; async backends (BV-BRC,
/// worker) return `InProgress` from `submit` and are polled later via
/// `status`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Submits a task for execution, returning an opaque handle used for
    /// all later calls. May resolve synchronously for fast backends.
    async fn submit(&self, task: &Task) -> Result<String, ExecutorError>;

    /// Polls the current status of a previously submitted task.
    async fn status(&self, handle: &str) -> Result<StatusReport, ExecutorError>;

    /// Retrieves captured logs for a task, when the backend supports it.
    async fn logs(&self, handle: &str) -> Result<TaskLogs, ExecutorError>;

    /// Requests best-effort cancellation of a running task. Backends that
    /// cannot cancel in-flight work may treat this as a no-op, but must
    /// not error (spec §4.1 cancellation cascade tolerates best-effort).
    async fn cancel(&self, handle: &str) -> Result<(), ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_code_succeeds_by_default() {
        assert_eq!(classify_exit_code(Some(0), &[], &[]), (true, true));
    }

    #[test]
    fn nonzero_exit_code_fails_by_default() {
        let (succeeded, retryable) = classify_exit_code(Some(1), &[], &[]);
        assert!(!succeeded);
        assert!(retryable);
    }

    #[test]
    fn success_codes_override_a_nonzero_exit() {
        assert_eq!(classify_exit_code(Some(2), &[2], &[]), (true, true));
        assert_eq!(classify_exit_code(Some(3), &[2], &[]), (false, true));
    }

    #[test]
    fn temporary_fail_codes_gate_retry_eligibility() {
        let (succeeded, retryable) = classify_exit_code(Some(42), &[], &[42]);
        assert!(!succeeded);
        assert!(retryable);

        let (succeeded, retryable) = classify_exit_code(Some(7), &[], &[42]);
        assert!(!succeeded);
        assert!(!retryable);
    }

    #[test]
    fn missing_exit_code_never_succeeds() {
        assert_eq!(classify_exit_code(None, &[], &[]).0, false);
    }
}
