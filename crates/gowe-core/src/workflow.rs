//! The compiled form of a CWL document and its DAG of Steps (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::executor_type::ExecutorType;

/// A declared workflow-level input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowInputDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

/// A declared workflow-level output, bound to an upstream step output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowOutputDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    /// `"stepID/outputID"`, the same source-expression grammar as a
    /// step-input source (spec §3 Step).
    pub output_source: String,
}

/// How to combine multiple sources into one value (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum LinkMerge {
    MergeNested,
    MergeFlattened,
}

/// How to collapse a merged/nullable value down to one (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum PickValue {
    FirstNonNull,
    TheOnlyNonNull,
    AllNonNull,
}

/// The source expression(s) a step-input draws its value from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum SourceSpec {
    /// No source at all (spec §4.4 edge case: resolves to `null`).
    None,
    /// `"stepID/outputID"` or `"workflowInputID"`.
    Single(String),
    /// Multiple sources, combined via `link_merge`.
    Multiple(Vec<String>),
}

impl Default for SourceSpec {
    fn default() -> Self {
        SourceSpec::None
    }
}

impl SourceSpec {
    pub fn is_empty(&self) -> bool {
        matches!(self, SourceSpec::None) || matches!(self, SourceSpec::Single(s) if s.is_empty())
    }
}

/// One step-input binding: where its value comes from and how to transform
/// it before the step runs (spec §3 Step, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StepInput {
    pub target: String,
    #[serde(default)]
    pub source: SourceSpec,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub value_from: Option<String>,
    #[serde(default)]
    pub load_contents: bool,
    #[serde(default)]
    pub link_merge: Option<LinkMerge>,
    #[serde(default)]
    pub pick_value: Option<PickValue>,
}

/// A declared tool input parameter (inline tool definition).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ToolInputDecl {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
}

/// A declared tool output parameter, with its glob pattern if one applies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ToolOutputDecl {
    pub id: String,
    #[serde(default)]
    pub glob: Option<String>,
}

/// An inline `CommandLineTool` embedded in a Step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ToolDefinition {
    pub base_command: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<ToolInputDecl>,
    #[serde(default)]
    pub outputs: Vec<ToolOutputDecl>,
    /// Exit codes besides `0` that still count as success (spec §6 "Exit
    /// code semantics").
    #[serde(default)]
    pub success_codes: Vec<i32>,
    /// Exit codes that mark a failure as retry-eligible. Empty means every
    /// non-success exit code is retry-eligible, up to the Task's own retry
    /// budget (spec §6 "Exit code semantics").
    #[serde(default)]
    pub temporary_fail_codes: Vec<i32>,
}

/// A Step's reference to the tool it runs: either a lookup by ID or an
/// inline definition (spec §3 Step).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ToolRef {
    External { tool_id: String },
    Inline { tool: ToolDefinition },
}

impl ToolRef {
    /// The tool definition, when one is available without an external
    /// lookup. `External` references are out of scope for the core driver
    /// (spec §1); a resolved `Workflow` always carries the inline form by
    /// the time it reaches the scheduler.
    pub fn inline(&self) -> Option<&ToolDefinition> {
        match self {
            ToolRef::Inline { tool } => Some(tool),
            ToolRef::External { .. } => None,
        }
    }
}

/// Executor/runtime hints attached to a Step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StepHints {
    #[serde(default)]
    pub executor_type: Option<ExecutorType>,
    #[serde(default)]
    pub docker_image: Option<String>,
    #[serde(default)]
    pub bvbrc_app_id: Option<String>,
    /// Restricts a `worker`-typed step to a Worker Queue partition (spec
    /// §4.6 "matches the worker's capabilities (runtime, group, ...)").
    /// `None` means any group may run it.
    #[serde(default)]
    pub worker_group: Option<String>,
}

/// A node in the workflow DAG (spec §3 Step).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Step {
    pub id: String,
    pub tool: ToolRef,
    #[serde(default)]
    pub inputs: Vec<StepInput>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub hints: StepHints,
}

/// The compiled, immutable form of a CWL document (spec §3 Workflow).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub cwl_version: String,
    /// Retained verbatim so a step's full tool/job context can be
    /// re-extracted later (spec §3 Workflow).
    pub raw_cwl: String,
    #[serde(default)]
    pub inputs: Vec<WorkflowInputDecl>,
    #[serde(default)]
    pub outputs: Vec<WorkflowOutputDecl>,
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_spec_empty() {
        assert!(SourceSpec::None.is_empty());
        assert!(SourceSpec::Single(String::new()).is_empty());
        assert!(!SourceSpec::Single("step1/out".into()).is_empty());
    }

    #[test]
    fn workflow_looks_up_step_by_id() {
        let wf = Workflow {
            id: Uuid::now_v7(),
            name: "wf".into(),
            cwl_version: "v1.2".into(),
            raw_cwl: String::new(),
            inputs: vec![],
            outputs: vec![],
            steps: vec![Step {
                id: "step1".into(),
                tool: ToolRef::Inline {
                    tool: ToolDefinition::default(),
                },
                inputs: vec![],
                outputs: vec![],
                depends_on: vec![],
                hints: StepHints::default(),
            }],
            created_at: Utc::now(),
        };

        assert!(wf.step("step1").is_some());
        assert!(wf.step("missing").is_none());
    }
}
