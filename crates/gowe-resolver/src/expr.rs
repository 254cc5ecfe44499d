//! The `valueFrom` expression hook.
//!
//! CWL's parameter-reference and JavaScript expression grammars are an
//! external collaborator, not something this engine evaluates itself
//! (spec §1, §4.4). `ExpressionEvaluator` is the seam a concrete JS (or
//! parameter-reference-only) evaluator plugs into; the resolver only ever
//! calls through the trait.

use async_trait::async_trait;
use serde_json::Value;

/// Evaluates a single `valueFrom` expression against the `self` value it
/// would otherwise have replaced, plus the full set of already-resolved
/// sibling inputs for the step (so an expression can reference `inputs`).
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        expression: &str,
        self_value: &Value,
        step_inputs: &Value,
    ) -> anyhow::Result<Value>;
}

/// An evaluator that only understands the literal-passthrough case: an
/// expression that is not wrapped in `$(...)`/`${...}` is returned
/// unevaluated, matching CWL's "string without expression syntax" rule.
/// Wrapped expressions fail — wire in a JS engine to support them.
pub struct NullEvaluator;

#[async_trait]
impl ExpressionEvaluator for NullEvaluator {
    async fn evaluate(
        &self,
        expression: &str,
        _self_value: &Value,
        _step_inputs: &Value,
    ) -> anyhow::Result<Value> {
        if expression.contains("$(") || expression.contains("${") {
            anyhow::bail!(
                "no JavaScript expression evaluator configured; cannot evaluate `{expression}`"
            );
        }
        Ok(Value::String(expression.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_evaluator_passes_through_plain_strings() {
        let eval = NullEvaluator;
        let v = eval
            .evaluate("plain-string", &Value::Null, &Value::Null)
            .await
            .unwrap();
        assert_eq!(v, Value::String("plain-string".into()));
    }

    #[tokio::test]
    async fn null_evaluator_rejects_js_expressions() {
        let eval = NullEvaluator;
        let err = eval
            .evaluate("$(inputs.x + 1)", &Value::Null, &Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no JavaScript expression evaluator"));
    }
}
