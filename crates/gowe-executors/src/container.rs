//! Runs a task's base command inside a Docker/OCI container (spec §4.5
//! `container` executor). Shares `local`'s "resolve synchronously, cache
//! under a handle" shape, swapping the subprocess for `docker run`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use gowe_core::reserved;
use gowe_core::{classify_exit_code, Executor, ExecutorError, StatusReport, Task, TaskLogs};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Command;
use uuid::Uuid;

struct Completed {
    status: StatusReport,
    logs: TaskLogs,
}

/// Executes base commands inside a container, mounting a per-task work
/// directory at `/workdir` and collecting declared output globs from it
/// once the container exits.
pub struct ContainerExecutor {
    docker_binary: String,
    work_dir_root: PathBuf,
    completed: Mutex<HashMap<String, Completed>>,
}

impl ContainerExecutor {
    pub fn new() -> Self {
        ContainerExecutor {
            docker_binary: "docker".to_string(),
            work_dir_root: std::env::temp_dir().join("gowe-container"),
            completed: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ContainerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    async fn submit(&self, task: &Task) -> Result<String, ExecutorError> {
        let handle = Uuid::now_v7().to_string();
        let work_dir = self.work_dir_root.join(&handle);
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| ExecutorError::Transient(format!("creating work dir: {e}")))?;

        let image = task
            .resolved_inputs
            .get(reserved::DOCKER_IMAGE)
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Permanent("task has no _docker_image".to_string()))?;

        let command = task
            .resolved_inputs
            .get(reserved::BASE_COMMAND)
            .and_then(Value::as_array)
            .ok_or_else(|| ExecutorError::Permanent("task has no _base_command".to_string()))?;

        let command_strs: Vec<String> = command
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let output = Command::new(&self.docker_binary)
            .arg("run")
            .arg("--rm")
            .arg("-v")
            .arg(format!("{}:/workdir", work_dir.display()))
            .arg("-w")
            .arg("/workdir")
            .arg(image)
            .args(&command_strs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExecutorError::Transient(format!("spawning docker: {e}")))?;

        let logs = TaskLogs {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        let exit_code = output.status.code();
        let (success_codes, temporary_fail_codes) = crate::local::exit_code_overrides(&task.resolved_inputs);
        let (succeeded, retryable) = classify_exit_code(exit_code, &success_codes, &temporary_fail_codes);

        let status = if succeeded {
            StatusReport::Succeeded {
                outputs: crate::local::collect_outputs(&work_dir, &task.resolved_inputs),
                exit_code,
            }
        } else {
            StatusReport::Failed {
                error: format!("container exit {exit_code:?}: {}", logs.stderr),
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gowe_core::{ExecutorType, TaskState};
    use serde_json::json;

    #[tokio::test]
    async fn missing_docker_image_is_a_permanent_failure() {
        let executor = ContainerExecutor::new();
        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            step_id: "step1".into(),
            depends_on: vec![],
            state: TaskState::Scheduled,
            executor_type: ExecutorType::Container,
            executor_handle: None,
            resolved_inputs: json!({ "_base_command": ["echo", "hi"] }),
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
        };
        let err = executor.submit(&task).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Permanent(_)));
    }
}
