//! Step-input resolution algorithm (spec §4.4): resolve each input's
//! source(s), merge, pick, default, transform via `valueFrom`, normalize
//! File/Directory structure, and inject the reserved keys an executor
//! reads its dispatch parameters from.

use std::collections::HashMap;

use gowe_core::reserved;
use gowe_core::workflow::{LinkMerge, PickValue, SourceSpec, Step, StepInput};
use gowe_core::ExecutorType;
use serde_json::{Map, Value};

use crate::directory;
use crate::error::{ResolverError, ResolverResult};
use crate::expr::ExpressionEvaluator;

/// The already-known values a step's inputs may draw from: the
/// submission's workflow-level inputs, and the outputs of every upstream
/// step that has already completed.
pub struct ResolutionContext<'a> {
    /// Workflow input ID -> value.
    pub workflow_inputs: &'a Map<String, Value>,
    /// `"stepID/outputID"` -> value, for every upstream step output
    /// produced so far.
    pub step_outputs: &'a HashMap<String, Value>,
}

impl<'a> ResolutionContext<'a> {
    /// Looks up one source expression. An upstream `"stepID/outputID"`
    /// that isn't in `step_outputs` resolves to `null` rather than erroring
    /// — spec §4.4/§4.7 conform to CWL semantics here (a SUCCESS task with
    /// no outputs at all is tolerated the same way, to support
    /// trigger-only dependencies on out-of-band executors).
    fn lookup(&self, _step_id: &str, _target: &str, source: &str) -> ResolverResult<Value> {
        if source.contains('/') {
            Ok(self.step_outputs.get(source).cloned().unwrap_or(Value::Null))
        } else {
            Ok(self.workflow_inputs.get(source).cloned().unwrap_or(Value::Null))
        }
    }
}

/// Resolves every declared input of `step` into a single JSON object,
/// keyed by target name, with the reserved dispatch keys
/// (`_base_command`, `_output_globs`, `_docker_image`, `_bvbrc_app_id`)
/// injected alongside the user-declared ones. `executor_type` is the
/// backend this step's task will actually dispatch to, used to infer the
/// URI scheme for any `Directory`-typed input left as a bare string
/// (spec §4.4 step 4).
pub async fn resolve_step_inputs(
    step: &Step,
    ctx: &ResolutionContext<'_>,
    evaluator: &dyn ExpressionEvaluator,
    executor_type: ExecutorType,
) -> ResolverResult<Value> {
    let mut resolved = Map::new();
    let directory_targets = directory_typed_targets(step);

    for input in &step.inputs {
        let mut value = resolve_one_input(step, input, ctx, evaluator, &resolved).await?;
        if directory_targets.contains(input.target.as_str()) {
            value = directory::promote_directory(value, executor_type);
        }
        resolved.insert(input.target.clone(), directory::normalize(value));
    }

    inject_reserved_keys(step, &mut resolved);

    Ok(Value::Object(resolved))
}

/// The set of input target names whose inline tool declaration types them
/// as a `Directory` (optionally nullable).
fn directory_typed_targets(step: &Step) -> std::collections::HashSet<&str> {
    let Some(tool) = step.tool.inline() else {
        return std::collections::HashSet::new();
    };
    tool.inputs
        .iter()
        .filter(|decl| directory::declares_directory(&decl.type_))
        .map(|decl| decl.id.as_str())
        .collect()
}

async fn resolve_one_input(
    step: &Step,
    input: &StepInput,
    ctx: &ResolutionContext<'_>,
    evaluator: &dyn ExpressionEvaluator,
    resolved_so_far: &Map<String, Value>,
) -> ResolverResult<Value> {
    let mut from_source = gather_source_value(step, input, ctx)?;

    if matches!(from_source, None | Some(Value::Null)) {
        from_source = input.default.clone();
    }

    let self_value = from_source.unwrap_or(Value::Null);

    if let Some(expression) = &input.value_from {
        let step_inputs_view = Value::Object(resolved_so_far.clone());
        return evaluator
            .evaluate(expression, &self_value, &step_inputs_view)
            .await
            .map_err(|source| ResolverError::ExpressionFailed {
                step_id: step.id.clone(),
                target: input.target.clone(),
                source,
            });
    }

    // A sourceless, default-less, valueFrom-less input records `null`
    // rather than erroring (spec §4.4 "If empty source(s) and no
    // valueFrom -> record null"; §8 scenario 6; §9 resolves this in favor
    // of CWL conformance rather than leaving it open).
    Ok(self_value)
}

/// Resolves just the `source`/`linkMerge`/`pickValue` portion of an input,
/// returning `None` when there is no source at all (spec §4.4: falls
/// through to `default`, then `valueFrom`).
fn gather_source_value(
    step: &Step,
    input: &StepInput,
    ctx: &ResolutionContext<'_>,
) -> ResolverResult<Option<Value>> {
    match &input.source {
        SourceSpec::None => Ok(None),
        SourceSpec::Single(source) if source.is_empty() => Ok(None),
        SourceSpec::Single(source) => Ok(Some(ctx.lookup(&step.id, &input.target, source)?)),
        SourceSpec::Multiple(sources) => {
            let values = sources
                .iter()
                .map(|s| ctx.lookup(&step.id, &input.target, s))
                .collect::<ResolverResult<Vec<Value>>>()?;

            let merged = match input.link_merge.unwrap_or(LinkMerge::MergeNested) {
                LinkMerge::MergeNested => Value::Array(values),
                LinkMerge::MergeFlattened => {
                    let mut flat = Vec::new();
                    for v in values {
                        match v {
                            Value::Array(items) => flat.extend(items),
                            other => flat.push(other),
                        }
                    }
                    Value::Array(flat)
                }
            };

            apply_pick_value(step, input, merged).map(Some)
        }
    }
}

fn apply_pick_value(step: &Step, input: &StepInput, merged: Value) -> ResolverResult<Value> {
    let Some(pick) = input.pick_value else {
        return Ok(merged);
    };

    let Value::Array(items) = merged else {
        return Ok(merged);
    };

    let non_null: Vec<Value> = items.into_iter().filter(|v| !v.is_null()).collect();

    match pick {
        PickValue::FirstNonNull => Ok(non_null.into_iter().next().unwrap_or(Value::Null)),
        PickValue::TheOnlyNonNull => match non_null.len() {
            0 => Ok(Value::Null),
            1 => Ok(non_null.into_iter().next().unwrap()),
            count => Err(ResolverError::NotExactlyOne {
                step_id: step.id.clone(),
                target: input.target.clone(),
                count,
            }),
        },
        PickValue::AllNonNull => Ok(Value::Array(non_null)),
    }
}

fn inject_reserved_keys(step: &Step, resolved: &mut Map<String, Value>) {
    if let Some(tool) = step.tool.inline() {
        resolved.insert(
            reserved::BASE_COMMAND.to_string(),
            Value::Array(tool.base_command.iter().cloned().map(Value::String).collect()),
        );

        let globs: Map<String, Value> = tool
            .outputs
            .iter()
            .filter_map(|o| o.glob.clone().map(|g| (o.id.clone(), Value::String(g))))
            .collect();
        resolved.insert(reserved::OUTPUT_GLOBS.to_string(), Value::Object(globs));

        if !tool.success_codes.is_empty() {
            resolved.insert(
                reserved::SUCCESS_CODES.to_string(),
                Value::Array(tool.success_codes.iter().map(|c| Value::from(*c)).collect()),
            );
        }

        if !tool.temporary_fail_codes.is_empty() {
            resolved.insert(
                reserved::TEMPORARY_FAIL_CODES.to_string(),
                Value::Array(tool.temporary_fail_codes.iter().map(|c| Value::from(*c)).collect()),
            );
        }
    }

    if let Some(image) = &step.hints.docker_image {
        resolved.insert(reserved::DOCKER_IMAGE.to_string(), Value::String(image.clone()));
    }

    if let Some(app_id) = &step.hints.bvbrc_app_id {
        resolved.insert(reserved::BVBRC_APP_ID.to_string(), Value::String(app_id.clone()));
    }

    if let Some(group) = &step.hints.worker_group {
        resolved.insert(reserved::WORKER_GROUP.to_string(), Value::String(group.clone()));
    }
}
