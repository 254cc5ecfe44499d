//! Core domain model for GoWe: Workflows, Tasks, Submissions, Workers, and
//! the Executor contract that binds them to pluggable backends.
//!
//! Mirrors `everruns-durable`'s split of a workflow-engine crate into
//! small, focused modules rather than one monolithic `types.rs`.

pub mod error;
pub mod executor;
pub mod executor_type;
pub mod reserved;
pub mod submission;
pub mod task;
pub mod worker;
pub mod workflow;

pub use prelude::*;

pub mod prelude {
    pub use crate::error::{DomainError, DomainResult};
    pub use crate::executor::{classify_exit_code, Executor, ExecutorError, StatusReport, TaskLogs};
    pub use crate::executor_type::{ExecutorType, UnknownExecutorType};
    pub use crate::reserved::{
        is_reserved_key, BASE_COMMAND, BVBRC_APP_ID, CREDENTIAL, DOCKER_IMAGE, OUTPUT_GLOBS, SUCCESS_CODES,
        TEMPORARY_FAIL_CODES, WORKER_GROUP,
    };
    pub use crate::submission::{IllegalSubmissionTransition, Submission, SubmissionState};
    pub use crate::task::{IllegalTransition, Task, TaskState};
    pub use crate::worker::{HeartbeatInstruction, Worker, WorkerState};
    pub use crate::workflow::{
        LinkMerge, PickValue, SourceSpec, Step, StepHints, StepInput, ToolDefinition, ToolInputDecl,
        ToolOutputDecl, ToolRef, Workflow, WorkflowInputDecl, WorkflowOutputDecl,
    };
}
