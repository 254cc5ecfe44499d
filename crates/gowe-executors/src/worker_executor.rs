//! The `worker` executor type's `Executor` impl (spec §4.5, §4.6).
//!
//! Unlike the other three backends, a `worker`-typed task is never
//! actually driven through `submit`/`status` — assignment happens when
//! the Worker Queue Dispatcher (`gowe-engine::worker_queue`) claims a
//! `SCHEDULED` task directly out of `gowe-store`, and completion arrives
//! when the remote agent reports a result back over HTTP, which writes
//! the terminal state straight into the Task row. This impl exists only
//! so the Executor Registry has a uniform entry for every
//! [`ExecutorType`](gowe_core::ExecutorType) — the scheduler's dispatch
//! phase calls `submit` as a formality, and its poll phase never calls
//! `status` on a worker task because the dispatcher routes around it.

use async_trait::async_trait;
use gowe_core::{Executor, ExecutorError, StatusReport, Task, TaskLogs};

pub struct WorkerExecutor;

impl WorkerExecutor {
    pub fn new() -> Self {
        WorkerExecutor
    }
}

impl Default for WorkerExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for WorkerExecutor {
    async fn submit(&self, task: &Task) -> Result<String, ExecutorError> {
        Ok(task.id.to_string())
    }

    async fn status(&self, _handle: &str) -> Result<StatusReport, ExecutorError> {
        Ok(StatusReport::InProgress)
    }

    async fn logs(&self, _handle: &str) -> Result<TaskLogs, ExecutorError> {
        Ok(TaskLogs::default())
    }

    async fn cancel(&self, _handle: &str) -> Result<(), ExecutorError> {
        Ok(())
    }
}
