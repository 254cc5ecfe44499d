//! Submission state machine: one run of a Workflow against concrete inputs
//! (spec §3 Submission, §4.1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A Submission's lifecycle state (spec §3 Submission, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SubmissionState {
    /// Accepted, no Tasks dispatched yet.
    Queued,
    /// At least one Task has left PENDING.
    Running,
    /// All Tasks reached a terminal state and none failed or were skipped.
    Succeeded,
    /// All Tasks reached a terminal state and at least one failed or was
    /// skipped.
    Failed,
    /// Cancelled by operator request; cascades to non-terminal Tasks.
    Cancelled,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionState::Succeeded | SubmissionState::Failed | SubmissionState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Succeeded)
                | (Queued, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// Error returned by [`Submission::transition_to`] on an illegal state
/// change.
#[derive(Debug, thiserror::Error)]
#[error("illegal submission transition: {from:?} -> {to:?} (submission {submission_id})")]
pub struct IllegalSubmissionTransition {
    pub submission_id: Uuid,
    pub from: SubmissionState,
    pub to: SubmissionState,
}

/// One run of a Workflow against a concrete set of workflow-level inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Submission {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Denormalized at creation time so reads never need a workflow join
    /// (spec §3 Submission).
    pub workflow_name: String,
    pub state: SubmissionState,
    /// Workflow-level input values supplied at submission time.
    pub inputs: Value,
    /// Workflow-level outputs, populated once all bound step outputs are
    /// available (spec §4.3).
    pub outputs: Value,
    #[serde(default)]
    pub labels: std::collections::HashMap<String, String>,
    pub submitted_by: String,
    /// Credential forwarded to executors on dispatch (spec §4.2 phase 2,
    /// §4.7 "credential expiry detected before dispatch").
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub credential_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Whether `credential` has expired as of `now` (spec §4.2 phase 2,
    /// §4.7). A submission with no credential never expires.
    pub fn credential_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.credential_expires_at, Some(expiry) if now > expiry)
    }

    pub fn transition_to(
        &mut self,
        next: SubmissionState,
        now: DateTime<Utc>,
    ) -> Result<(), IllegalSubmissionTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalSubmissionTransition {
                submission_id: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Submission {
        let now = Utc::now();
        Submission {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "wf".into(),
            state: SubmissionState::Queued,
            inputs: Value::Null,
            outputs: Value::Null,
            labels: std::collections::HashMap::new(),
            submitted_by: "tester".into(),
            credential: None,
            credential_expires_at: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    #[test]
    fn terminal_transition_stamps_finished_at() {
        let mut s = sample();
        s.transition_to(SubmissionState::Running, Utc::now()).unwrap();
        assert!(s.finished_at.is_none());
        s.transition_to(SubmissionState::Succeeded, Utc::now()).unwrap();
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn illegal_transition_rejected() {
        let mut s = sample();
        s.state = SubmissionState::Succeeded;
        let err = s.transition_to(SubmissionState::Running, Utc::now()).unwrap_err();
        assert_eq!(err.from, SubmissionState::Succeeded);
    }

    #[test]
    fn queued_can_go_straight_to_cancelled() {
        let mut s = sample();
        s.transition_to(SubmissionState::Cancelled, Utc::now()).unwrap();
        assert_eq!(s.state, SubmissionState::Cancelled);
    }

    #[test]
    fn credential_expiry_checked_against_now() {
        let mut s = sample();
        assert!(!s.credential_expired(Utc::now()));
        s.credential = Some("token".into());
        s.credential_expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(s.credential_expired(Utc::now()));
        s.credential_expires_at = Some(Utc::now() + chrono::Duration::minutes(1));
        assert!(!s.credential_expired(Utc::now()));
    }
}
