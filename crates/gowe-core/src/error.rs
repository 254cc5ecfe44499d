//! Shared domain error type, mirroring `everruns-core::error`'s
//! thiserror-enum-plus-constructors idiom.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can arise purely from domain-model invariants, as opposed
/// to storage or transport failures (those live in `gowe-store` and
/// `gowe-api` respectively).
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("workflow {0} has no step {1}")]
    UnknownStep(Uuid, String),

    #[error("step {0} declares a dependency on unknown step {1}")]
    UnknownDependency(String, String),

    #[error("workflow DAG contains a cycle through step {0}")]
    CyclicDependency(String),

    #[error("step {0} input {1} has neither a source, a default, nor a valueFrom expression")]
    UnresolvableInput(String, String),

    #[error(transparent)]
    Transition(#[from] crate::task::IllegalTransition),

    #[error(transparent)]
    SubmissionTransition(#[from] crate::submission::IllegalSubmissionTransition),
}

pub type DomainResult<T> = Result<T, DomainError>;
