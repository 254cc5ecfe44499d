//! Remote worker-agent registration and heartbeat state (spec §3 Worker,
//! §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered worker's lifecycle state (spec §3 Worker, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum WorkerState {
    /// Registered, not currently holding a Task.
    Idle,
    /// Checked out exactly one Task and is executing it.
    Busy,
    /// Requested to finish its current task and take no more
    /// (spec §4.6 drain instruction).
    Draining,
    /// Missed its heartbeat deadline; eligible for the stale sweep
    /// (spec §4.6).
    Stale,
    /// Explicitly deregistered or swept after prolonged staleness.
    Offline,
}

impl WorkerState {
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Busy)
                | (Idle, Draining)
                | (Idle, Stale)
                | (Idle, Offline)
                | (Busy, Idle)
                | (Busy, Draining)
                | (Busy, Stale)
                | (Draining, Idle)
                | (Draining, Offline)
                | (Draining, Stale)
                | (Stale, Idle)
                | (Stale, Offline)
        )
    }
}

/// An instruction piggybacked on a heartbeat response, telling the worker
/// how to behave going forward (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum HeartbeatInstruction {
    /// Keep polling for work as normal.
    Continue,
    /// Finish the in-flight task, if any, then stop polling.
    Drain,
    /// Abandon the in-flight task immediately (best-effort cancel).
    CancelCurrent,
}

/// A registered remote worker agent, capable of executing tasks whose
/// `executor_type` is `worker` (spec §3 Worker).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Worker {
    pub id: Uuid,
    /// Operator-facing name supplied at registration (spec §3 Worker
    /// "name").
    pub name: String,
    /// Hostname or address the worker registered from (spec §3 Worker
    /// "host"); informational only, the dispatcher never connects back to
    /// it since the protocol is pull-based (spec §4.6).
    pub host: String,
    /// Scheduling partition this worker belongs to (spec §3 Worker "group
    /// label"); the dispatcher only hands a worker tasks from its own
    /// group when a step hints one.
    pub group: String,
    /// How the worker runs containerized steps: `"docker"`, `"apptainer"`,
    /// or `"bare"` (spec §3 Worker "runtime tag").
    pub runtime_tag: String,
    /// Free-form capability labels this worker advertises at registration
    /// (e.g. `"gpu"`, `"bvbrc-proxy"`); the dispatcher only hands a worker
    /// tasks whose step hints are a subset of this set.
    pub capabilities: Vec<String>,
    pub state: WorkerState,
    pub current_task_id: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl Worker {
    /// Whether this worker has missed the heartbeat TTL as of `now`
    /// (spec §4.6 stale-worker sweep).
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_heartbeat_at > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_busy_legal() {
        assert!(WorkerState::Idle.can_transition_to(WorkerState::Busy));
        assert!(!WorkerState::Busy.can_transition_to(WorkerState::Busy));
    }

    #[test]
    fn expiry_respects_ttl() {
        let now = Utc::now();
        let w = Worker {
            id: Uuid::now_v7(),
            name: "w1".into(),
            host: "10.0.0.1".into(),
            group: "default".into(),
            runtime_tag: "bare".into(),
            capabilities: vec![],
            state: WorkerState::Idle,
            current_task_id: None,
            registered_at: now - chrono::Duration::minutes(10),
            last_heartbeat_at: now - chrono::Duration::minutes(5),
        };
        assert!(w.is_expired(now, chrono::Duration::minutes(1)));
        assert!(!w.is_expired(now, chrono::Duration::minutes(30)));
    }
}
