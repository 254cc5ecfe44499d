use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("submission {0} not found")]
    SubmissionNotFound(Uuid),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("worker {0} not found")]
    WorkerNotFound(Uuid),

    #[error("backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
