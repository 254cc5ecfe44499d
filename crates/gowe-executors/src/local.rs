//! Runs a task's base command as a local subprocess (spec §4.5 `local`
//! executor).
//!
//! `submit` runs the command to completion before returning — a "sync"
//! backend in the sense of spec §4.5 — and caches the terminal
//! [`StatusReport`] under a generated handle for the scheduler's later
//! `status`/`logs` calls to retrieve, since the `Executor` trait always
//! separates submission from status polling.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use gowe_core::reserved;
use gowe_core::{classify_exit_code, Executor, ExecutorError, StatusReport, Task, TaskLogs};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::process::Command;
use uuid::Uuid;

struct Completed {
    status: StatusReport,
    logs: TaskLogs,
}

/// Executes base commands as local subprocesses under a per-task working
/// directory.
pub struct LocalExecutor {
    work_dir_root: PathBuf,
    completed: Mutex<HashMap<String, Completed>>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        LocalExecutor {
            work_dir_root: std::env::temp_dir().join("gowe-local"),
            completed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_work_dir_root(work_dir_root: PathBuf) -> Self {
        LocalExecutor {
            work_dir_root,
            completed: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn submit(&self, task: &Task) -> Result<String, ExecutorError> {
        let handle = Uuid::now_v7().to_string();
        let work_dir = self.work_dir_root.join(&handle);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| ExecutorError::Transient(format!("creating work dir: {e}")))?;

        let command = base_command(&task.resolved_inputs)
            .ok_or_else(|| ExecutorError::Permanent("task has no _base_command".to_string()))?;

        let Some((program, args)) = command.split_first() else {
            return Err(ExecutorError::Permanent("_base_command is empty".to_string()));
        };

        let output = Command::new(program)
            .args(args)
            .current_dir(&work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExecutorError::Transient(format!("spawning {program}: {e}")))?;

        let logs = TaskLogs {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        let exit_code = output.status.code();
        let (success_codes, temporary_fail_codes) = exit_code_overrides(&task.resolved_inputs);
        let (succeeded, retryable) = classify_exit_code(exit_code, &success_codes, &temporary_fail_codes);

        let status = if succeeded {
            let outputs = collect_outputs(&work_dir, &task.resolved_inputs);
            StatusReport::Succeeded { outputs, exit_code }
        } else {
            StatusReport::Failed {
                error: format!("exit status {exit_code:?}: {}", logs.stderr),
                exit_code,
                retryable,
            }
        };

        self.completed.lock().insert(handle.clone(), Completed { status, logs });

        Ok(handle)
    }

    async fn status(&self, handle: &str) -> Result<StatusReport, ExecutorError> {
        self.completed
            .lock()
            .get(handle)
            .map(|c| c.status.clone())
            .ok_or_else(|| ExecutorError::HandleNotFound(handle.to_string()))
    }

    async fn logs(&self, handle: &str) -> Result<TaskLogs, ExecutorError> {
        self.completed
            .lock()
            .get(handle)
            .map(|c| c.logs.clone())
            .ok_or_else(|| ExecutorError::HandleNotFound(handle.to_string()))
    }

    async fn cancel(&self, _handle: &str) -> Result<(), ExecutorError> {
        // The subprocess has already exited by the time submit() returns;
        // there is nothing in-flight left to cancel.
        Ok(())
    }
}

fn base_command(resolved_inputs: &Value) -> Option<Vec<String>> {
    resolved_inputs
        .get(reserved::BASE_COMMAND)?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Reads `_success_codes`/`_temporary_fail_codes` back out of
/// `resolved_inputs`, where the resolver injected them from the tool's
/// declaration (spec §6 "Exit code semantics").
pub(crate) fn exit_code_overrides(resolved_inputs: &Value) -> (Vec<i32>, Vec<i32>) {
    let read = |key: &str| {
        resolved_inputs
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_i64).map(|n| n as i32).collect())
            .unwrap_or_default()
    };
    (read(reserved::SUCCESS_CODES), read(reserved::TEMPORARY_FAIL_CODES))
}

pub(crate) fn collect_outputs(work_dir: &std::path::Path, resolved_inputs: &Value) -> Value {
    let Some(globs) = resolved_inputs.get(reserved::OUTPUT_GLOBS).and_then(Value::as_object) else {
        return Value::Object(Map::new());
    };

    let mut outputs = Map::new();
    for (output_id, pattern) in globs {
        let Some(pattern) = pattern.as_str() else { continue };
        let full_pattern = work_dir.join(pattern);
        let matches: Vec<Value> = glob::glob(&full_pattern.to_string_lossy())
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .map(|path| {
                serde_json::json!({
                    "class": "File",
                    "location": format!("file://{}", path.display()),
                })
            })
            .collect();
        outputs.insert(output_id.clone(), Value::Array(matches));
    }
    Value::Object(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gowe_core::{ExecutorType, TaskState};
    use serde_json::json;

    fn sample_task(resolved_inputs: Value) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            step_id: "step1".into(),
            depends_on: vec![],
            state: TaskState::Scheduled,
            executor_type: ExecutorType::Local,
            executor_handle: None,
            resolved_inputs,
            outputs: Value::Null,
            stdout: None,
            stderr: None,
            retry_count: 0,
            max_retries: 0,
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn runs_command_and_reports_success() {
        let executor = LocalExecutor::new();
        let task = sample_task(json!({ "_base_command": ["true"] }));
        let handle = executor.submit(&task).await.unwrap();
        let status = executor.status(&handle).await.unwrap();
        assert!(matches!(status, StatusReport::Succeeded { .. }));
    }

    #[tokio::test]
    async fn reports_failure_on_nonzero_exit() {
        let executor = LocalExecutor::new();
        let task = sample_task(json!({ "_base_command": ["false"] }));
        let handle = executor.submit(&task).await.unwrap();
        let status = executor.status(&handle).await.unwrap();
        assert!(matches!(status, StatusReport::Failed { .. }));
    }

    #[tokio::test]
    async fn success_codes_override_a_nonzero_exit() {
        let executor = LocalExecutor::new();
        let task = sample_task(json!({ "_base_command": ["false"], "_success_codes": [1] }));
        let handle = executor.submit(&task).await.unwrap();
        let status = executor.status(&handle).await.unwrap();
        assert!(matches!(status, StatusReport::Succeeded { exit_code: Some(1), .. }));
    }

    #[tokio::test]
    async fn temporary_fail_codes_gate_retry_eligibility() {
        let executor = LocalExecutor::new();
        let task = sample_task(json!({ "_base_command": ["false"], "_temporary_fail_codes": [99] }));
        let handle = executor.submit(&task).await.unwrap();
        let status = executor.status(&handle).await.unwrap();
        match status {
            StatusReport::Failed { retryable, exit_code, .. } => {
                assert_eq!(exit_code, Some(1));
                assert!(!retryable);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_base_command_is_a_permanent_failure() {
        let executor = LocalExecutor::new();
        let task = sample_task(json!({}));
        let err = executor.submit(&task).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Permanent(_)));
    }

    #[tokio::test]
    async fn unknown_handle_errors() {
        let executor = LocalExecutor::new();
        assert!(executor.status("nonexistent").await.is_err());
    }
}
