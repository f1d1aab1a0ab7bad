//! Condition evaluation against event payloads.

use pulsebridge_core::Condition;
use pulsebridge_template::{eval, parse_expr, truthy};
use serde_json::Value;

/// Evaluate one condition against an event payload.
///
/// A missing or type-mismatched field is a non-match (`Ok(false)`), never an
/// error. Only predicate parse or evaluation failures return `Err`; the
/// caller skips the mapping and logs them.
pub fn matches(condition: &Condition, payload: &Value) -> Result<bool, String> {
    match condition {
        Condition::Contains { field, value } => Ok(lookup(payload, field)
            .and_then(scalar_str)
            .is_some_and(|s| s.contains(value.as_str()))),
        Condition::Threshold { field, op, value } => Ok(lookup(payload, field)
            .and_then(scalar_num)
            .is_some_and(|n| op.compare(n, *value))),
        Condition::AllowList { field, values } => Ok(lookup(payload, field)
            .and_then(scalar_str)
            .is_some_and(|s| values.iter().any(|v| v == &s))),
        Condition::DenyList { field, values } => Ok(lookup(payload, field)
            .and_then(scalar_str)
            .is_some_and(|s| values.iter().all(|v| v != &s))),
        Condition::Predicate { expr } => {
            let parsed = parse_expr(expr).map_err(|e| e.to_string())?;
            let value = eval(&parsed, payload).map_err(|e| e.to_string())?;
            Ok(truthy(&value))
        }
    }
}

/// Resolve a dotted path (`gift.name`) into the payload.
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn scalar_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        // Counts often arrive as strings on the wire.
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
