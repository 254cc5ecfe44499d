//! Postgres-backed `Store`, grounded on
//! `durable::persistence::postgres::PostgresStore`'s connection-pool and
//! `FOR UPDATE SKIP LOCKED` claim pattern.

use async_trait::async_trait;
use chrono::Utc;
use gowe_core::{Submission, SubmissionState, Task, TaskState, Worker, WorkerState, Workflow};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{ClaimedTask, Store};

/// A `Store` backed by Postgres via `sqlx`.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(PostgresStore { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_workflow(&self, workflow: Workflow) -> StoreResult<Workflow> {
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, cwl_version, raw_cwl, inputs, outputs, steps, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.cwl_version)
        .bind(&workflow.raw_cwl)
        .bind(serde_json::to_value(&workflow.inputs)?)
        .bind(serde_json::to_value(&workflow.outputs)?)
        .bind(serde_json::to_value(&workflow.steps)?)
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await?;
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> StoreResult<Workflow> {
        let row = sqlx::query(
            "SELECT id, name, cwl_version, raw_cwl, inputs, outputs, steps, created_at FROM workflows WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::WorkflowNotFound(id))?;

        row_to_workflow(&row)
    }

    async fn list_workflows(&self) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query(
            "SELECT id, name, cwl_version, raw_cwl, inputs, outputs, steps, created_at FROM workflows ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_workflow).collect()
    }

    async fn delete_workflow(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::WorkflowNotFound(id));
        }
        Ok(())
    }

    async fn count_submissions_for_workflow(&self, workflow_id: Uuid) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM submissions WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    async fn create_submission(&self, submission: Submission) -> StoreResult<Submission> {
        sqlx::query(
            r#"
            INSERT INTO submissions
                (id, workflow_id, workflow_name, state, inputs, outputs, labels,
                 submitted_by, credential, credential_expires_at, created_at,
                 updated_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(submission.id)
        .bind(submission.workflow_id)
        .bind(&submission.workflow_name)
        .bind(serde_json::to_string(&submission.state)?)
        .bind(&submission.inputs)
        .bind(&submission.outputs)
        .bind(serde_json::to_value(&submission.labels)?)
        .bind(&submission.submitted_by)
        .bind(&submission.credential)
        .bind(submission.credential_expires_at)
        .bind(submission.created_at)
        .bind(submission.updated_at)
        .bind(submission.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(submission)
    }

    async fn get_submission(&self, id: Uuid) -> StoreResult<Submission> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, workflow_name, state, inputs, outputs, labels,
                   submitted_by, credential, credential_expires_at, created_at,
                   updated_at, finished_at
            FROM submissions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::SubmissionNotFound(id))?;
        row_to_submission(&row)
    }

    async fn update_submission(&self, submission: Submission) -> StoreResult<Submission> {
        let result = sqlx::query(
            r#"
            UPDATE submissions
            SET state = $2, inputs = $3, outputs = $4, labels = $5, credential = $6,
                credential_expires_at = $7, updated_at = $8, finished_at = $9
            WHERE id = $1
            "#,
        )
        .bind(submission.id)
        .bind(serde_json::to_string(&submission.state)?)
        .bind(&submission.inputs)
        .bind(&submission.outputs)
        .bind(serde_json::to_value(&submission.labels)?)
        .bind(&submission.credential)
        .bind(submission.credential_expires_at)
        .bind(submission.updated_at)
        .bind(submission.finished_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SubmissionNotFound(submission.id));
        }
        Ok(submission)
    }

    async fn list_submissions(&self) -> StoreResult<Vec<Submission>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, workflow_name, state, inputs, outputs, labels,
                   submitted_by, credential, credential_expires_at, created_at,
                   updated_at, finished_at
            FROM submissions
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_submission).collect()
    }

    async fn list_submissions_by_state(&self, state: SubmissionState) -> StoreResult<Vec<Submission>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, workflow_name, state, inputs, outputs, labels,
                   submitted_by, credential, credential_expires_at, created_at,
                   updated_at, finished_at
            FROM submissions WHERE state = $1
            "#,
        )
        .bind(serde_json::to_string(&state)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_submission).collect()
    }

    async fn create_task(&self, task: Task) -> StoreResult<Task> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, submission_id, step_id, depends_on, state, executor_type, executor_handle,
                 resolved_inputs, outputs, stdout, stderr, retry_count, max_retries, last_error,
                 started_at, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(task.id)
        .bind(task.submission_id)
        .bind(&task.step_id)
        .bind(&task.depends_on)
        .bind(serde_json::to_string(&task.state)?)
        .bind(serde_json::to_string(&task.executor_type)?)
        .bind(&task.executor_handle)
        .bind(&task.resolved_inputs)
        .bind(&task.outputs)
        .bind(&task.stdout)
        .bind(&task.stderr)
        .bind(task.retry_count as i32)
        .bind(task.max_retries as i32)
        .bind(&task.last_error)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(task)
    }

    async fn get_task(&self, id: Uuid) -> StoreResult<Task> {
        let row = sqlx::query(
            r#"
            SELECT id, submission_id, step_id, depends_on, state, executor_type, executor_handle,
                   resolved_inputs, outputs, stdout, stderr, retry_count, max_retries, last_error,
                   started_at, completed_at, created_at, updated_at
            FROM tasks WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::TaskNotFound(id))?;
        row_to_task(&row)
    }

    async fn update_task(&self, task: Task) -> StoreResult<Task> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = $2, executor_handle = $3, resolved_inputs = $4, outputs = $5,
                stdout = $6, stderr = $7, retry_count = $8, last_error = $9,
                started_at = $10, completed_at = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(serde_json::to_string(&task.state)?)
        .bind(&task.executor_handle)
        .bind(&task.resolved_inputs)
        .bind(&task.outputs)
        .bind(&task.stdout)
        .bind(&task.stderr)
        .bind(task.retry_count as i32)
        .bind(&task.last_error)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task.id));
        }
        Ok(task)
    }

    async fn list_tasks_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, submission_id, step_id, depends_on, state, executor_type, executor_handle,
                   resolved_inputs, outputs, stdout, stderr, retry_count, max_retries, last_error,
                   started_at, completed_at, created_at, updated_at
            FROM tasks WHERE submission_id = $1
            "#,
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn list_tasks_by_state(&self, state: TaskState) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, submission_id, step_id, depends_on, state, executor_type, executor_handle,
                   resolved_inputs, outputs, stdout, stderr, retry_count, max_retries, last_error,
                   started_at, completed_at, created_at, updated_at
            FROM tasks WHERE state = $1
            "#,
        )
        .bind(serde_json::to_string(&state)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn list_active_tasks_for_submission(&self, submission_id: Uuid) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, submission_id, step_id, depends_on, state, executor_type, executor_handle,
                   resolved_inputs, outputs, stdout, stderr, retry_count, max_retries, last_error,
                   started_at, completed_at, created_at, updated_at
            FROM tasks
            WHERE submission_id = $1
              AND state NOT IN ('skipped', 'succeeded', 'failed', 'cancelled')
            "#,
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn upsert_worker(&self, worker: Worker) -> StoreResult<Worker> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, name, host, group_label, runtime_tag, capabilities, state, current_task_id, registered_at, last_heartbeat_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                host = EXCLUDED.host,
                group_label = EXCLUDED.group_label,
                runtime_tag = EXCLUDED.runtime_tag,
                capabilities = EXCLUDED.capabilities,
                state = EXCLUDED.state,
                current_task_id = EXCLUDED.current_task_id,
                last_heartbeat_at = EXCLUDED.last_heartbeat_at
            "#,
        )
        .bind(worker.id)
        .bind(&worker.name)
        .bind(&worker.host)
        .bind(&worker.group)
        .bind(&worker.runtime_tag)
        .bind(&worker.capabilities)
        .bind(serde_json::to_string(&worker.state)?)
        .bind(worker.current_task_id)
        .bind(worker.registered_at)
        .bind(worker.last_heartbeat_at)
        .execute(&self.pool)
        .await?;
        Ok(worker)
    }

    async fn get_worker(&self, id: Uuid) -> StoreResult<Worker> {
        let row = sqlx::query(
            "SELECT id, name, host, group_label, runtime_tag, capabilities, state, current_task_id, registered_at, last_heartbeat_at FROM workers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::WorkerNotFound(id))?;
        row_to_worker(&row)
    }

    async fn list_workers_by_state(&self, state: WorkerState) -> StoreResult<Vec<Worker>> {
        let rows = sqlx::query(
            "SELECT id, name, host, group_label, runtime_tag, capabilities, state, current_task_id, registered_at, last_heartbeat_at FROM workers WHERE state = $1",
        )
        .bind(serde_json::to_string(&state)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_worker).collect()
    }

    async fn delete_worker(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::WorkerNotFound(id));
        }
        Ok(())
    }

    /// Atomic checkout for the worker queue dispatcher (spec §4.6), using
    /// the same `FOR UPDATE SKIP LOCKED` CTE shape as
    /// `durable::persistence::postgres::PostgresStore::claim_task`, so
    /// concurrent dispatcher instances never hand the same task to two
    /// workers.
    async fn claim_task_for_worker(
        &self,
        worker_id: Uuid,
        _capabilities: &[String],
    ) -> StoreResult<Option<ClaimedTask>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT id
                FROM tasks
                WHERE state = 'scheduled' AND executor_type = 'worker'
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE tasks
            SET state = 'running', executor_handle = $1, started_at = now(), updated_at = now()
            FROM candidate
            WHERE tasks.id = candidate.id
            RETURNING tasks.id, tasks.submission_id, tasks.step_id, tasks.depends_on, tasks.state,
                      tasks.executor_type, tasks.executor_handle, tasks.resolved_inputs,
                      tasks.outputs, tasks.stdout, tasks.stderr, tasks.retry_count,
                      tasks.max_retries, tasks.last_error,
                      tasks.started_at, tasks.completed_at, tasks.created_at, tasks.updated_at
            "#,
        )
        .bind(worker_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let task = row_to_task(&row)?;

        sqlx::query(
            "UPDATE workers SET state = 'busy', current_task_id = $2 WHERE id = $1",
        )
        .bind(worker_id)
        .bind(task.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(ClaimedTask { task, worker_id }))
    }

    async fn list_stale_workers(&self, ttl: chrono::Duration) -> StoreResult<Vec<Worker>> {
        let cutoff = Utc::now() - ttl;
        let rows = sqlx::query(
            "SELECT id, name, host, group_label, runtime_tag, capabilities, state, current_task_id, registered_at, last_heartbeat_at FROM workers WHERE state != 'offline' AND last_heartbeat_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_worker).collect()
    }
}

fn row_to_workflow(row: &sqlx::postgres::PgRow) -> StoreResult<Workflow> {
    Ok(Workflow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cwl_version: row.try_get("cwl_version")?,
        raw_cwl: row.try_get("raw_cwl")?,
        inputs: serde_json::from_value(row.try_get("inputs")?)?,
        outputs: serde_json::from_value(row.try_get("outputs")?)?,
        steps: serde_json::from_value(row.try_get("steps")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_submission(row: &sqlx::postgres::PgRow) -> StoreResult<Submission> {
    let state_str: String = row.try_get("state")?;
    Ok(Submission {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        workflow_name: row.try_get("workflow_name")?,
        state: serde_json::from_str(&format!("\"{state_str}\""))?,
        inputs: row.try_get("inputs")?,
        outputs: row.try_get("outputs")?,
        labels: serde_json::from_value(row.try_get("labels")?)?,
        submitted_by: row.try_get("submitted_by")?,
        credential: row.try_get("credential")?,
        credential_expires_at: row.try_get("credential_expires_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn row_to_task(row: &sqlx::postgres::PgRow) -> StoreResult<Task> {
    let state_str: String = row.try_get("state")?;
    let executor_type_str: String = row.try_get("executor_type")?;
    Ok(Task {
        id: row.try_get("id")?,
        submission_id: row.try_get("submission_id")?,
        step_id: row.try_get("step_id")?,
        depends_on: row.try_get("depends_on")?,
        state: serde_json::from_str(&format!("\"{state_str}\""))?,
        executor_type: serde_json::from_str(&format!("\"{executor_type_str}\""))?,
        executor_handle: row.try_get("executor_handle")?,
        resolved_inputs: row.try_get("resolved_inputs")?,
        outputs: row.try_get("outputs")?,
        stdout: row.try_get("stdout")?,
        stderr: row.try_get("stderr")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        max_retries: row.try_get::<i32, _>("max_retries")? as u32,
        last_error: row.try_get("last_error")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_worker(row: &sqlx::postgres::PgRow) -> StoreResult<Worker> {
    let state_str: String = row.try_get("state")?;
    Ok(Worker {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        group: row.try_get("group_label")?,
        runtime_tag: row.try_get("runtime_tag")?,
        capabilities: row.try_get("capabilities")?,
        state: serde_json::from_str(&format!("\"{state_str}\""))?,
        current_task_id: row.try_get("current_task_id")?,
        registered_at: row.try_get("registered_at")?,
        last_heartbeat_at: row.try_get("last_heartbeat_at")?,
    })
}
