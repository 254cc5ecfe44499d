//! Parses a raw CWL v1.2 `Workflow` document (YAML or JSON — YAML is a
//! JSON superset, so one `serde_yaml` pass handles both) into the compiled
//! [`gowe_core::workflow::Workflow`] the scheduler drives.
//!
//! spec.md §1 names "the CWL parser and Schema-Salad preprocessor" as an
//! external collaborator, out of scope for the core engine's own
//! specification; this module is the minimal ingress adapter the HTTP
//! layer needs to satisfy spec.md §6's `POST /workflows` contract ("raw
//! CWL (YAML/JSON) + name/description -> Parse, persist Workflow"). It
//! covers the flat-DAG subset the scheduler actually executes — inline
//! `CommandLineTool` steps, typed inputs/outputs, `source`/`valueFrom`/
//! `linkMerge`/`pickValue` step-input bindings, and `DockerRequirement`/
//! BV-BRC hints — and leaves scatter/gather, `when`, and external tool
//! references (`$import`) unimplemented, consistent with spec.md's
//! Non-goals ("these may be added by the parser but the core state
//! machine treats the expanded DAG only").

use std::collections::BTreeSet;

use gowe_core::workflow::{
    LinkMerge, PickValue, SourceSpec, Step, StepHints, StepInput, ToolDefinition, ToolInputDecl,
    ToolOutputDecl, ToolRef, Workflow, WorkflowInputDecl, WorkflowOutputDecl,
};
use gowe_core::ExecutorType;
use serde_yaml::Value as YValue;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CwlParseError {
    #[error("raw document is not valid YAML or JSON: {0}")]
    Syntax(#[from] serde_yaml::Error),

    #[error("document has no top-level mapping")]
    NotAMapping,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported `class`: expected `Workflow`, found `{0}`")]
    UnsupportedClass(String),

    #[error("step `{0}` has no `run` tool definition")]
    MissingRun(String),

    #[error("step `{0}` input `{1}` has an unsupported `in` binding shape")]
    UnsupportedInputBinding(String, String),
}

/// Parses `raw` and produces a `Workflow` ready to persist. `id` and
/// `created_at` are assigned by the caller at persistence time; this
/// function only fills in the content derived from the document itself,
/// plus `name` (taken from the request, not the document — CWL documents
/// don't carry a display name).
pub fn parse_workflow(raw: &str, name: String, created_at: chrono::DateTime<chrono::Utc>) -> Result<Workflow, CwlParseError> {
    let doc: YValue = serde_yaml::from_str(raw)?;
    let root = doc.as_mapping().ok_or(CwlParseError::NotAMapping)?;

    let class = get_str(root, "class").unwrap_or("Workflow");
    if class != "Workflow" {
        return Err(CwlParseError::UnsupportedClass(class.to_string()));
    }

    let cwl_version = get_str(root, "cwlVersion").unwrap_or("v1.2").to_string();

    let inputs = parse_workflow_inputs(root.get("inputs"));
    let outputs = parse_workflow_outputs(root.get("outputs"));
    let mut steps = parse_steps(root.get("steps"))?;
    derive_dependencies(&mut steps);

    Ok(Workflow {
        id: Uuid::now_v7(),
        name,
        cwl_version,
        raw_cwl: raw.to_string(),
        inputs,
        outputs,
        steps,
        created_at,
    })
}

fn get_str<'a>(map: &'a serde_yaml::Mapping, key: &str) -> Option<&'a str> {
    map.get(key).and_then(|v| v.as_str())
}

fn type_string(v: Option<&YValue>) -> String {
    match v {
        Some(YValue::String(s)) => s.clone(),
        Some(YValue::Mapping(m)) => m
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("Any")
            .to_string(),
        _ => "Any".to_string(),
    }
}

/// CWL allows `inputs`/`outputs`/`steps` as either a mapping (ID ->
/// definition) or a list of `{id: ..., ...}` objects; both are accepted.
fn iter_id_keyed<'a>(v: Option<&'a YValue>) -> Vec<(String, &'a YValue)> {
    match v {
        Some(YValue::Mapping(m)) => m
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v)))
            .collect(),
        Some(YValue::Sequence(seq)) => seq
            .iter()
            .filter_map(|item| {
                let id = item.as_mapping()?.get("id")?.as_str()?.to_string();
                Some((id, item))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_workflow_inputs(v: Option<&YValue>) -> Vec<WorkflowInputDecl> {
    iter_id_keyed(v)
        .into_iter()
        .map(|(id, def)| {
            let default = def.as_mapping().and_then(|m| m.get("default")).and_then(to_json);
            let required = default.is_none()
                && !matches!(def, YValue::Mapping(m) if m.get("type").and_then(|t| t.as_str()).map(|t| t.ends_with('?')).unwrap_or(false));
            WorkflowInputDecl {
                id,
                type_: type_string(Some(def)),
                default,
                required,
            }
        })
        .collect()
}

fn parse_workflow_outputs(v: Option<&YValue>) -> Vec<WorkflowOutputDecl> {
    iter_id_keyed(v)
        .into_iter()
        .filter_map(|(id, def)| {
            let map = def.as_mapping()?;
            let output_source = map
                .get("outputSource")
                .or_else(|| map.get("output_source"))
                .and_then(|s| s.as_str())?
                .to_string();
            Some(WorkflowOutputDecl {
                id,
                type_: type_string(Some(def)),
                output_source,
            })
        })
        .collect()
}

fn parse_steps(v: Option<&YValue>) -> Result<Vec<Step>, CwlParseError> {
    iter_id_keyed(v)
        .into_iter()
        .map(|(id, def)| parse_step(id, def))
        .collect()
}

fn parse_step(id: String, def: &YValue) -> Result<Step, CwlParseError> {
    let map = def.as_mapping().ok_or_else(|| CwlParseError::MissingRun(id.clone()))?;
    let run = map.get("run").ok_or_else(|| CwlParseError::MissingRun(id.clone()))?;
    let tool = parse_tool(run)?;

    let inputs = parse_step_inputs(&id, map.get("in"))?;
    let outputs = map
        .get("out")
        .and_then(|v| v.as_sequence())
        .map(|seq| seq.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let hints = parse_step_hints(map.get("hints"), map.get("requirements"));

    Ok(Step {
        id,
        tool: ToolRef::Inline { tool },
        inputs,
        outputs,
        depends_on: Vec::new(),
        hints,
    })
}

fn parse_tool(v: &YValue) -> Result<ToolDefinition, CwlParseError> {
    let map = v.as_mapping().ok_or(CwlParseError::NotAMapping)?;

    let base_command = match map.get("baseCommand") {
        Some(YValue::Sequence(seq)) => seq.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        Some(YValue::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    };

    let inputs = iter_id_keyed(map.get("inputs"))
        .into_iter()
        .map(|(id, def)| ToolInputDecl {
            id,
            type_: type_string(Some(def)),
        })
        .collect();

    let outputs = iter_id_keyed(map.get("outputs"))
        .into_iter()
        .map(|(id, def)| {
            let glob = def
                .as_mapping()
                .and_then(|m| m.get("outputBinding"))
                .and_then(|b| b.as_mapping())
                .and_then(|b| b.get("glob"))
                .and_then(|g| g.as_str())
                .map(String::from);
            ToolOutputDecl { id, glob }
        })
        .collect();

    let success_codes = parse_int_sequence(map.get("successCodes"));
    let temporary_fail_codes = parse_int_sequence(map.get("temporaryFailCodes"));

    Ok(ToolDefinition {
        base_command,
        inputs,
        outputs,
        success_codes,
        temporary_fail_codes,
    })
}

fn parse_int_sequence(v: Option<&YValue>) -> Vec<i32> {
    v.and_then(|v| v.as_sequence())
        .map(|seq| seq.iter().filter_map(|v| v.as_i64().map(|n| n as i32)).collect())
        .unwrap_or_default()
}

fn parse_step_inputs(step_id: &str, v: Option<&YValue>) -> Result<Vec<StepInput>, CwlParseError> {
    iter_id_keyed(v)
        .into_iter()
        .map(|(target, def)| parse_step_input(step_id, target, def))
        .collect()
}

fn parse_step_input(step_id: &str, target: String, def: &YValue) -> Result<StepInput, CwlParseError> {
    match def {
        // `target: "otherStep/output"` or `target: "workflowInput"` shorthand.
        YValue::String(s) => Ok(StepInput {
            target,
            source: SourceSpec::Single(s.clone()),
            ..Default::default()
        }),
        YValue::Mapping(m) => {
            let source = match m.get("source") {
                None => SourceSpec::None,
                Some(YValue::String(s)) => SourceSpec::Single(s.clone()),
                Some(YValue::Sequence(seq)) => {
                    SourceSpec::Multiple(seq.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                }
                Some(_) => return Err(CwlParseError::UnsupportedInputBinding(step_id.to_string(), target)),
            };

            let default = m.get("default").and_then(to_json);
            let value_from = m.get("valueFrom").and_then(|v| v.as_str()).map(String::from);
            let load_contents = m.get("loadContents").and_then(|v| v.as_bool()).unwrap_or(false);
            let link_merge = m.get("linkMerge").and_then(|v| v.as_str()).and_then(parse_link_merge);
            let pick_value = m.get("pickValue").and_then(|v| v.as_str()).and_then(parse_pick_value);

            Ok(StepInput {
                target,
                source,
                default,
                value_from,
                load_contents,
                link_merge,
                pick_value,
            })
        }
        _ => Err(CwlParseError::UnsupportedInputBinding(step_id.to_string(), target)),
    }
}

fn parse_link_merge(s: &str) -> Option<LinkMerge> {
    match s {
        "merge_nested" => Some(LinkMerge::MergeNested),
        "merge_flattened" => Some(LinkMerge::MergeFlattened),
        _ => None,
    }
}

fn parse_pick_value(s: &str) -> Option<PickValue> {
    match s {
        "first_non_null" => Some(PickValue::FirstNonNull),
        "the_only_non_null" => Some(PickValue::TheOnlyNonNull),
        "all_non_null" => Some(PickValue::AllNonNull),
        _ => None,
    }
}

/// Reads executor/runtime hints from both `hints` and `requirements`
/// (CWL treats a `DockerRequirement` under either as binding); a
/// non-standard `gowe:executorType`/`gowe:bvbrcAppId` hint key selects the
/// backend, since plain CWL has no concept of GoWe's executor types.
fn parse_step_hints(hints: Option<&YValue>, requirements: Option<&YValue>) -> StepHints {
    let mut out = StepHints::default();

    for block in [hints, requirements].into_iter().flatten() {
        let Some(map) = block.as_mapping() else { continue };

        if let Some(docker) = map.get("DockerRequirement").and_then(|v| v.as_mapping()) {
            if let Some(image) = docker.get("dockerPull").and_then(|v| v.as_str()) {
                out.docker_image = Some(image.to_string());
            }
        }

        if let Some(gowe) = map.get("gowe").and_then(|v| v.as_mapping()) {
            if let Some(ty) = gowe.get("executorType").and_then(|v| v.as_str()) {
                out.executor_type = ty.parse::<ExecutorType>().ok();
            }
            if let Some(app_id) = gowe.get("bvbrcAppId").and_then(|v| v.as_str()) {
                out.bvbrc_app_id = Some(app_id.to_string());
            }
            if let Some(group) = gowe.get("workerGroup").and_then(|v| v.as_str()) {
                out.worker_group = Some(group.to_string());
            }
        }
    }

    if out.executor_type.is_none() && out.bvbrc_app_id.is_some() {
        out.executor_type = Some(ExecutorType::Bvbrc);
    } else if out.executor_type.is_none() && out.docker_image.is_some() {
        out.executor_type = Some(ExecutorType::Container);
    }

    out
}

fn to_json(v: &YValue) -> Option<serde_json::Value> {
    serde_json::to_value(v).ok()
}

/// CWL leaves step dependencies implicit in the `source` references
/// between steps' `in` bindings; this reconstructs the explicit
/// `depends_on` list `gowe_core::workflow::Step` and the dependency
/// evaluator (spec §4.3) need.
fn derive_dependencies(steps: &mut [Step]) {
    let step_ids: BTreeSet<String> = steps.iter().map(|s| s.id.clone()).collect();

    for step in steps.iter_mut() {
        let mut deps = BTreeSet::new();
        for input in &step.inputs {
            for source in referenced_sources(&input.source) {
                if let Some((upstream, _)) = source.split_once('/') {
                    if step_ids.contains(upstream) && upstream != step.id {
                        deps.insert(upstream.to_string());
                    }
                }
            }
        }
        step.depends_on = deps.into_iter().collect();
    }
}

fn referenced_sources(source: &SourceSpec) -> Vec<&str> {
    match source {
        SourceSpec::None => Vec::new(),
        SourceSpec::Single(s) => vec![s.as_str()],
        SourceSpec::Multiple(items) => items.iter().map(|s| s.as_str()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
cwlVersion: v1.2
class: Workflow
inputs:
  greeting:
    type: string
    default: hello
outputs:
  final:
    type: File
    outputSource: step2/result
steps:
  step1:
    run:
      class: CommandLineTool
      baseCommand: [echo]
      inputs:
        message: {type: string}
      outputs:
        result:
          type: File
          outputBinding: {glob: "*.txt"}
    in:
      message: greeting
    out: [result]
  step2:
    run:
      class: CommandLineTool
      baseCommand: [cat]
      inputs:
        input_file: {type: File}
      outputs:
        result: {type: File, outputBinding: {glob: "out.txt"}}
    in:
      input_file:
        source: step1/result
    out: [result]
    hints:
      DockerRequirement:
        dockerPull: ubuntu:22.04
"#;

    #[test]
    fn parses_steps_and_derives_dependencies() {
        let wf = parse_workflow(SIMPLE, "demo".into(), chrono::Utc::now()).unwrap();
        assert_eq!(wf.steps.len(), 2);
        let step1 = wf.step("step1").unwrap();
        let step2 = wf.step("step2").unwrap();
        assert!(step1.depends_on.is_empty());
        assert_eq!(step2.depends_on, vec!["step1".to_string()]);
        assert_eq!(step2.hints.docker_image.as_deref(), Some("ubuntu:22.04"));
        assert_eq!(step2.hints.executor_type, Some(ExecutorType::Container));
    }

    #[test]
    fn parses_workflow_level_io() {
        let wf = parse_workflow(SIMPLE, "demo".into(), chrono::Utc::now()).unwrap();
        assert_eq!(wf.inputs[0].id, "greeting");
        assert_eq!(wf.inputs[0].default, Some(serde_json::json!("hello")));
        assert_eq!(wf.outputs[0].output_source, "step2/result");
    }

    #[test]
    fn rejects_non_workflow_class() {
        let doc = "cwlVersion: v1.2\nclass: CommandLineTool\nbaseCommand: [echo]\n";
        let err = parse_workflow(doc, "bad".into(), chrono::Utc::now()).unwrap_err();
        assert!(matches!(err, CwlParseError::UnsupportedClass(_)));
    }

    #[test]
    fn string_shorthand_in_binding_is_a_single_source() {
        let doc = r#"
cwlVersion: v1.2
class: Workflow
steps:
  only:
    run:
      class: CommandLineTool
      baseCommand: [echo]
    in:
      x: some_workflow_input
    out: []
"#;
        let wf = parse_workflow(doc, "demo".into(), chrono::Utc::now()).unwrap();
        let step = wf.step("only").unwrap();
        assert_eq!(step.inputs[0].source, SourceSpec::Single("some_workflow_input".into()));
    }
}
