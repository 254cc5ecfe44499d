use thiserror::Error;

/// Failures a single `Tick` phase can raise. Per spec §4.2, a tick that
/// errors in any phase is logged and the next tick proceeds — these are
/// never propagated as a reason to stop the loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] gowe_store::error::StoreError),

    #[error(transparent)]
    Resolver(#[from] gowe_resolver::error::ResolverError),

    #[error(transparent)]
    NoBackend(#[from] gowe_executors::registry::NoBackendRegistered),

    #[error(transparent)]
    Transition(#[from] gowe_core::task::IllegalTransition),

    #[error(transparent)]
    SubmissionTransition(#[from] gowe_core::submission::IllegalSubmissionTransition),

    #[error("unknown step {0} referenced by task {1}")]
    UnknownStep(String, uuid::Uuid),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
