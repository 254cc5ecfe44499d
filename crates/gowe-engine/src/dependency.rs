//! Dependency resolution: whether a Task's upstream Tasks let it proceed
//! or doom it to be skipped (spec §4.3).

use std::collections::HashMap;

use gowe_core::{Task, TaskState};

/// The result of checking one Task's dependencies against its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyOutcome {
    /// Every dependency succeeded; the task may be scheduled.
    Satisfied,
    /// At least one dependency failed or was skipped; the task can never
    /// run.
    Blocked,
    /// Dependencies are still in flight; try again next tick.
    Waiting,
}

/// Evaluates `task`'s `depends_on` step IDs against `siblings` (every
/// other Task in the same Submission, indexed by step ID).
pub fn evaluate(step_depends_on: &[String], siblings: &HashMap<String, &Task>) -> DependencyOutcome {
    if step_depends_on.is_empty() {
        return DependencyOutcome::Satisfied;
    }

    let mut waiting = false;

    for dep_step_id in step_depends_on {
        match siblings.get(dep_step_id) {
            None => return DependencyOutcome::Blocked,
            Some(dep_task) => match dep_task.state {
                TaskState::Skipped | TaskState::Failed | TaskState::Cancelled => {
                    return DependencyOutcome::Blocked
                }
                TaskState::Succeeded => continue,
                _ => waiting = true,
            },
        }
    }

    if waiting {
        DependencyOutcome::Waiting
    } else {
        DependencyOutcome::Satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gowe_core::ExecutorType;
    use serde_json::Value;
    use uuid::Uuid;

    fn task_with_state(step_id: &str, state: TaskState) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::now_v7(),
            submission_id: Uuid::now_v7(),
            step_id: step_id.to_string(),
            state,
            executor_type: ExecutorType::Local,
            executor_handle: None,
            resolved_inputs: Value::Null,
            outputs: Value::Null,
            stdout: None,
            stderr: None,
            retry_count: 0,
            max_retries: 0,
            last_error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn no_dependencies_is_satisfied() {
        let siblings = HashMap::new();
        assert_eq!(evaluate(&[], &siblings), DependencyOutcome::Satisfied);
    }

    #[test]
    fn missing_sibling_blocks() {
        let siblings = HashMap::new();
        assert_eq!(
            evaluate(&["step1".to_string()], &siblings),
            DependencyOutcome::Blocked
        );
    }

    #[test]
    fn failed_dependency_blocks() {
        let dep = task_with_state("step1", TaskState::Failed);
        let mut siblings = HashMap::new();
        siblings.insert("step1".to_string(), &dep);
        assert_eq!(
            evaluate(&["step1".to_string()], &siblings),
            DependencyOutcome::Blocked
        );
    }

    #[test]
    fn succeeded_dependency_satisfies() {
        let dep = task_with_state("step1", TaskState::Succeeded);
        let mut siblings = HashMap::new();
        siblings.insert("step1".to_string(), &dep);
        assert_eq!(
            evaluate(&["step1".to_string()], &siblings),
            DependencyOutcome::Satisfied
        );
    }

    #[test]
    fn in_flight_dependency_waits() {
        let dep = task_with_state("step1", TaskState::Running);
        let mut siblings = HashMap::new();
        siblings.insert("step1".to_string(), &dep);
        assert_eq!(
            evaluate(&["step1".to_string()], &siblings),
            DependencyOutcome::Waiting
        );
    }

    #[test]
    fn mixed_dependencies_prefer_blocked_over_waiting() {
        let dep1 = task_with_state("step1", TaskState::Running);
        let dep2 = task_with_state("step2", TaskState::Skipped);
        let mut siblings = HashMap::new();
        siblings.insert("step1".to_string(), &dep1);
        siblings.insert("step2".to_string(), &dep2);
        assert_eq!(
            evaluate(&["step1".to_string(), "step2".to_string()], &siblings),
            DependencyOutcome::Blocked
        );
    }
}
