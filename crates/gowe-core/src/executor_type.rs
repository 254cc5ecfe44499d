//! The four executor kinds a Step/Task can be routed to (spec §4.5, §6).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies which backend a Task dispatches to.
///
/// This is the key the Executor Registry (`gowe-executors::Registry`) is
/// indexed by, mirroring `durable::engine::registry::WorkflowRegistry`'s
/// type-name-keyed factory map but with a closed, known set of variants
/// rather than open registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ExecutorType {
    /// Runs the base command as a local subprocess.
    Local,
    /// Runs the base command inside a Docker/OCI container.
    Container,
    /// Hands the task to the BV-BRC JSON-RPC application service.
    Bvbrc,
    /// Enqueues the task for pull-based checkout by a remote worker agent.
    Worker,
}

impl ExecutorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorType::Local => "local",
            ExecutorType::Container => "container",
            ExecutorType::Bvbrc => "bvbrc",
            ExecutorType::Worker => "worker",
        }
    }
}

impl fmt::Display for ExecutorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown executor type string.
///
/// Spec §4.7: "Unknown executor type for a task -> task FAILED (permanent;
/// operator must re-define the step)" — callers turn this into that
/// terminal, non-retryable failure rather than propagating it as a bug.
#[derive(Debug, thiserror::Error)]
#[error("unknown executor type: {0}")]
pub struct UnknownExecutorType(pub String);

impl FromStr for ExecutorType {
    type Err = UnknownExecutorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ExecutorType::Local),
            "container" => Ok(ExecutorType::Container),
            "bvbrc" => Ok(ExecutorType::Bvbrc),
            "worker" => Ok(ExecutorType::Worker),
            other => Err(UnknownExecutorType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for ty in [
            ExecutorType::Local,
            ExecutorType::Container,
            ExecutorType::Bvbrc,
            ExecutorType::Worker,
        ] {
            assert_eq!(ty.as_str().parse::<ExecutorType>().unwrap(), ty);
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!("ecs".parse::<ExecutorType>().is_err());
    }
}
