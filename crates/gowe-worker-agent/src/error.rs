//! Failure modes for the agent's HTTP calls against `gowe-api`'s worker
//! protocol (spec §4.6, §6).

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("request to {0} failed: {1}")]
    Request(String, reqwest::Error),

    #[error("server rejected {0} with status {1}: {2}")]
    Server(String, reqwest::StatusCode, String),

    #[error("worker is shutting down")]
    Shutdown,
}

pub type AgentResult<T> = Result<T, AgentError>;
