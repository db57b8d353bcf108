//! Parameter binding for rule actions.
//!
//! A parameter's value comes from the first source that yields one:
//!
//! 1. the binding's `parameter_mapping` (`$ctx.<name>`, `$step.<action>.<path>`
//!    or a literal);
//! 2. the execution-context value of the same name;
//! 3. the preference default for the rule (only when preferences are open);
//! 4. the action's declared default.
//!
//! A required parameter with no value, or any value of the wrong type, is a
//! binding error raised before the action runs.

use super::{ActionOutput, ExecutionContext};
use crate::error::{DirectiveError, Result};
use crate::model::Action;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const CTX_PREFIX: &str = "$ctx.";
const STEP_PREFIX: &str = "$step.";

/// Evaluate one mapping expression. `None` means the referenced value does
/// not exist.
fn evaluate(expr: &Value, ctx: &ExecutionContext, steps: &[ActionOutput]) -> Option<Value> {
    let Value::String(text) = expr else {
        return Some(expr.clone());
    };
    if let Some(name) = text.strip_prefix(CTX_PREFIX) {
        return ctx.get(name).cloned();
    }
    if let Some(reference) = text.strip_prefix(STEP_PREFIX) {
        let mut parts = reference.split('.');
        let action_id = parts.next()?;
        let output = steps.iter().rev().find(|o| o.action_id == action_id)?;
        let mut value = &output.payload;
        for part in parts {
            value = match value {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        return Some(value.clone());
    }
    Some(expr.clone())
}

fn binding_error(action: &Action, param: &str, reason: impl Into<String>) -> DirectiveError {
    DirectiveError::Binding {
        action: action.id.clone(),
        param: param.to_string(),
        reason: reason.into(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolve every declared parameter of `action`. Undeclared context values
/// are not passed through.
pub fn resolve_params(
    action: &Action,
    mapping: &BTreeMap<String, Value>,
    ctx: &ExecutionContext,
    steps: &[ActionOutput],
    defaults: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for param in &action.params {
        // Null counts as absent at every source.
        let value = mapping
            .get(&param.name)
            .and_then(|expr| evaluate(expr, ctx, steps))
            .filter(|v| !v.is_null())
            .or_else(|| ctx.get(&param.name).filter(|v| !v.is_null()).cloned())
            .or_else(|| {
                defaults
                    .and_then(|d| d.get(&param.name))
                    .filter(|v| !v.is_null())
                    .cloned()
            })
            .or_else(|| param.default.clone().filter(|v| !v.is_null()));

        match value {
            Some(value) => {
                if !param.kind.accepts(&value) {
                    return Err(binding_error(
                        action,
                        &param.name,
                        format!("expected {}, got {}", param.kind, type_name(&value)),
                    ));
                }
                params.insert(param.name.clone(), value);
            }
            None if param.required => {
                return Err(binding_error(action, &param.name, "missing required parameter"));
            }
            None => {}
        }
    }
    Ok(params)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamSpec;
    use crate::types::{ParamKind, StoreTarget};
    use serde_json::json;

    fn action() -> Action {
        Action {
            id: "create_task".into(),
            name: "create_task".into(),
            params: vec![
                ParamSpec {
                    name: "milestone_id".into(),
                    kind: ParamKind::Integer,
                    required: true,
                    default: None,
                },
                ParamSpec {
                    name: "name".into(),
                    kind: ParamKind::String,
                    required: true,
                    default: None,
                },
                ParamSpec {
                    name: "priority".into(),
                    kind: ParamKind::Integer,
                    required: false,
                    default: Some(json!(0)),
                },
            ],
            pure: false,
            is_tool: true,
            is_sub_action: false,
            target: StoreTarget::Project,
        }
    }

    fn output(action_id: &str, payload: Value) -> ActionOutput {
        ActionOutput {
            index: 0,
            action_id: action_id.into(),
            sequence_order: 1,
            payload,
        }
    }

    #[test]
    fn sources_apply_in_order() {
        let mapping = BTreeMap::from([("name".to_string(), json!("$ctx.title"))]);
        let ctx = ExecutionContext::new()
            .with("title", json!("from mapping"))
            .with("name", json!("from context"))
            .with("milestone_id", json!(4));
        let defaults = Map::from_iter([("priority".to_string(), json!(7))]);

        let params = resolve_params(&action(), &mapping, &ctx, &[], Some(&defaults)).unwrap();
        assert_eq!(params["name"], "from mapping");
        assert_eq!(params["milestone_id"], 4);
        assert_eq!(params["priority"], 7);

        let params = resolve_params(&action(), &mapping, &ctx, &[], None).unwrap();
        assert_eq!(params["priority"], 0);
    }

    #[test]
    fn null_at_any_source_falls_through() {
        let mapping = BTreeMap::from([
            ("name".to_string(), json!("$ctx.title")),
            ("priority".to_string(), json!("$ctx.rank")),
        ]);
        let ctx = ExecutionContext::new()
            .with("title", Value::Null)
            .with("name", json!("from context"))
            .with("rank", Value::Null)
            .with("priority", Value::Null)
            .with("milestone_id", json!(4));
        let defaults = Map::from_iter([("priority".to_string(), Value::Null)]);

        let params = resolve_params(&action(), &mapping, &ctx, &[], Some(&defaults)).unwrap();
        assert_eq!(params["name"], "from context");
        assert_eq!(params["priority"], 0);
    }

    #[test]
    fn step_reference_reads_earlier_payload() {
        let mapping = BTreeMap::from([
            ("milestone_id".to_string(), json!("$step.plan_milestone.milestone.id")),
            ("name".to_string(), json!("first task")),
        ]);
        let steps = [output("plan_milestone", json!({ "milestone": { "id": 12 } }))];
        let params =
            resolve_params(&action(), &mapping, &ExecutionContext::new(), &steps, None).unwrap();
        assert_eq!(params["milestone_id"], 12);
        assert_eq!(params["name"], "first task");
    }

    #[test]
    fn unresolved_mapping_falls_through_to_context() {
        let mapping = BTreeMap::from([("milestone_id".to_string(), json!("$step.nope.id"))]);
        let ctx = ExecutionContext::new()
            .with("milestone_id", json!(3))
            .with("name", json!("t"));
        let params = resolve_params(&action(), &mapping, &ctx, &[], None).unwrap();
        assert_eq!(params["milestone_id"], 3);
    }

    #[test]
    fn missing_required_is_binding_error() {
        let ctx = ExecutionContext::new().with("milestone_id", json!(1));
        match resolve_params(&action(), &BTreeMap::new(), &ctx, &[], None) {
            Err(DirectiveError::Binding { param, reason, .. }) => {
                assert_eq!(param, "name");
                assert!(reason.contains("missing"));
            }
            other => panic!("expected binding error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_type_is_binding_error() {
        let ctx = ExecutionContext::new()
            .with("milestone_id", json!("four"))
            .with("name", json!("t"));
        assert!(matches!(
            resolve_params(&action(), &BTreeMap::new(), &ctx, &[], None),
            Err(DirectiveError::Binding { reason, .. }) if reason == "expected integer, got string"
        ));
    }
}
