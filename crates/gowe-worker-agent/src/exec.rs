//! Runs a checked-out Task's base command, locally or in a container
//! depending on whether it carries `_docker_image` (spec §4.5 `local`/
//! `container` executors, §4.6 "a worker executes the Task the same way
//! the `local`/`container` backends would"). Adapted from
//! `gowe-executors::local`/`gowe-executors::container`, which run inside
//! the server process; here the same subprocess shape runs inside the
//! agent instead.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use gowe_core::{classify_exit_code, reserved};
use serde_json::{Map, Value};
use tokio::process::Command;
use uuid::Uuid;

use crate::client::TaskOutcome;

pub struct TaskRunner {
    work_dir_root: PathBuf,
    docker_binary: String,
}

impl TaskRunner {
    pub fn new(work_dir_root: PathBuf, docker_binary: String) -> Self {
        TaskRunner { work_dir_root, docker_binary }
    }

    /// Runs `resolved_inputs`'s `_base_command` to completion, reporting a
    /// terminal [`TaskOutcome`] either way — a worker never reports
    /// `InProgress` back, it polls for its next task once this resolves.
    pub async fn run(&self, task_id: Uuid, resolved_inputs: &Value) -> TaskOutcome {
        let work_dir = self.work_dir_root.join(task_id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            return permanent_failure(format!("creating work dir: {e}"));
        }

        let Some(command) = base_command(resolved_inputs) else {
            return permanent_failure("task has no _base_command".to_string());
        };
        let Some((program, args)) = command.split_first() else {
            return permanent_failure("_base_command is empty".to_string());
        };

        let docker_image = resolved_inputs.get(reserved::DOCKER_IMAGE).and_then(Value::as_str);

        let output = match docker_image {
            Some(image) => {
                Command::new(&self.docker_binary)
                    .arg("run")
                    .arg("--rm")
                    .arg("-v")
                    .arg(format!("{}:/workdir", work_dir.display()))
                    .arg("-w")
                    .arg("/workdir")
                    .arg(image)
                    .arg(program)
                    .args(args)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await
            }
            None => {
                Command::new(program)
                    .args(args)
                    .current_dir(&work_dir)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await
            }
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => return permanent_failure(format!("spawning {program}: {e}")),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        let exit_code = output.status.code();
        let (success_codes, temporary_fail_codes) = exit_code_overrides(resolved_inputs);
        let (succeeded, retryable) = classify_exit_code(exit_code, &success_codes, &temporary_fail_codes);

        if succeeded {
            TaskOutcome {
                state: gowe_core::TaskState::Succeeded,
                exit_code,
                retryable: true,
                stdout: Some(stdout),
                stderr: Some(stderr),
                outputs: collect_outputs(&work_dir, resolved_inputs),
            }
        } else {
            TaskOutcome {
                state: gowe_core::TaskState::Failed,
                exit_code,
                retryable,
                stdout: Some(stdout),
                stderr: Some(stderr),
                outputs: Value::Null,
            }
        }
    }
}

fn permanent_failure(message: String) -> TaskOutcome {
    TaskOutcome {
        state: gowe_core::TaskState::Failed,
        exit_code: None,
        retryable: false,
        stdout: None,
        stderr: Some(message),
        outputs: Value::Null,
    }
}

/// Reads `_success_codes`/`_temporary_fail_codes` back out of
/// `resolved_inputs`, mirroring `gowe-executors::local`'s reserved-key
/// lookup (spec §6 "Exit code semantics").
fn exit_code_overrides(resolved_inputs: &Value) -> (Vec<i32>, Vec<i32>) {
    let read = |key: &str| {
        resolved_inputs
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_i64).map(|n| n as i32).collect())
            .unwrap_or_default()
    };
    (read(reserved::SUCCESS_CODES), read(reserved::TEMPORARY_FAIL_CODES))
}

fn base_command(resolved_inputs: &Value) -> Option<Vec<String>> {
    resolved_inputs
        .get(reserved::BASE_COMMAND)?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn collect_outputs(work_dir: &Path, resolved_inputs: &Value) -> Value {
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
    use serde_json::json;

    #[tokio::test]
    async fn runs_local_command_and_reports_success() {
        let dir = std::env::temp_dir().join(format!("gowe-worker-agent-test-{}", Uuid::now_v7()));
        let runner = TaskRunner::new(dir, "docker".to_string());
        let outcome = runner.run(Uuid::now_v7(), &json!({ "_base_command": ["true"] })).await;
        assert_eq!(outcome.state, gowe_core::TaskState::Succeeded);
    }

    #[tokio::test]
    async fn reports_failure_on_nonzero_exit() {
        let dir = std::env::temp_dir().join(format!("gowe-worker-agent-test-{}", Uuid::now_v7()));
        let runner = TaskRunner::new(dir, "docker".to_string());
        let outcome = runner.run(Uuid::now_v7(), &json!({ "_base_command": ["false"] })).await;
        assert_eq!(outcome.state, gowe_core::TaskState::Failed);
    }

    #[tokio::test]
    async fn success_codes_override_a_nonzero_exit() {
        let dir = std::env::temp_dir().join(format!("gowe-worker-agent-test-{}", Uuid::now_v7()));
        let runner = TaskRunner::new(dir, "docker".to_string());
        let outcome = runner
            .run(Uuid::now_v7(), &json!({ "_base_command": ["false"], "_success_codes": [1] }))
            .await;
        assert_eq!(outcome.state, gowe_core::TaskState::Succeeded);
        assert_eq!(outcome.exit_code, Some(1));
    }

    #[tokio::test]
    async fn temporary_fail_codes_gate_retry_eligibility() {
        let dir = std::env::temp_dir().join(format!("gowe-worker-agent-test-{}", Uuid::now_v7()));
        let runner = TaskRunner::new(dir, "docker".to_string());
        let outcome = runner
            .run(Uuid::now_v7(), &json!({ "_base_command": ["false"], "_temporary_fail_codes": [99] }))
            .await;
        assert_eq!(outcome.state, gowe_core::TaskState::Failed);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(!outcome.retryable);
    }

    #[tokio::test]
    async fn missing_base_command_is_a_permanent_failure() {
        let dir = std::env::temp_dir().join(format!("gowe-worker-agent-test-{}", Uuid::now_v7()));
        let runner = TaskRunner::new(dir, "docker".to_string());
        let outcome = runner.run(Uuid::now_v7(), &json!({})).await;
        assert_eq!(outcome.state, gowe_core::TaskState::Failed);
        assert!(outcome.stderr.unwrap().contains("_base_command"));
    }
}
