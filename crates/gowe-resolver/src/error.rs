use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("step {step_id} input {target} pickValue=the_only_non_null saw {count} non-null values")]
    NotExactlyOne {
        step_id: String,
        target: String,
        count: usize,
    },

    #[error("valueFrom expression failed for step {step_id} input {target}: {source}")]
    ExpressionFailed {
        step_id: String,
        target: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type ResolverResult<T> = Result<T, ResolverError>;
