//! A small, total expression language for Team routing predicates: the
//! two named booleans (`all_success`, `any_failure`), dotted-path existence
//! checks, and integer/string comparisons (`data.changes.length > 0`).
//! Evaluation never panics and never has side effects; a condition that
//! fails to evaluate (bad path, malformed literal) is treated as `false`
//! and logged, per SPEC_FULL.md §4.5/§7's `routing_error` handling.

use serde_json::Value as Json;

const COMPARISON_OPERATORS: &[&str] = &[">=", "<=", "==", "!=", ">", "<"];

/// Evaluate `condition` against `context` (the routing view built by
/// [`crate::team::routing_context`]), never propagating an error — only
/// logging one.
pub fn evaluate(condition: &str, context: &Json) -> bool {
    match try_evaluate(condition, context) {
        Ok(value) => value,
        Err(reason) => {
            tracing::warn!(condition, reason = %reason, "routing_error: treating condition as false");
            false
        }
    }
}

fn try_evaluate(condition: &str, context: &Json) -> Result<bool, String> {
    let condition = condition.trim();
    if condition.is_empty() {
        return Err("empty routing condition".to_string());
    }

    for op in COMPARISON_OPERATORS {
        if let Some(idx) = condition.find(op) {
            let lhs = condition[..idx].trim();
            let rhs = condition[idx + op.len()..].trim();
            let lhs_value = resolve_path(context, lhs)
                .ok_or_else(|| format!("path '{lhs}' does not resolve"))?;
            let rhs_value = parse_literal(rhs)?;
            return compare(op, &lhs_value, &rhs_value);
        }
    }

    // No comparison operator: either a named boolean or a bare existence
    // check (true if the path resolves to a non-null value).
    match resolve_path(context, condition) {
        Some(Json::Bool(b)) => Ok(b),
        Some(value) => Ok(!value.is_null()),
        None => Ok(false),
    }
}

/// Resolves a dotted path against `context`, with a `.length` suffix
/// special-cased to mean "the length of the array/object/string at the
/// path it follows" (arrays and objects report element count, strings
/// report character count).
fn resolve_path(context: &Json, path: &str) -> Option<Json> {
    if let Some(base) = path.strip_suffix(".length") {
        let value = resolve_plain_path(context, base)?;
        let length = match value {
            Json::Array(items) => items.len(),
            Json::Object(map) => map.len(),
            Json::String(s) => s.chars().count(),
            _ => return None,
        };
        return Some(Json::Number(length.into()));
    }
    resolve_plain_path(context, path)
}

fn resolve_plain_path(context: &Json, path: &str) -> Option<Json> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn parse_literal(text: &str) -> Result<Json, String> {
    if text == "true" {
        return Ok(Json::Bool(true));
    }
    if text == "false" {
        return Ok(Json::Bool(false));
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Json::Number(i.into()));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Ok(serde_json::Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null));
    }
    let unquoted = text.trim_matches('"');
    Ok(Json::String(unquoted.to_string()))
}

fn compare(op: &str, lhs: &Json, rhs: &Json) -> Result<bool, String> {
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return Ok(match op {
            ">" => a > b,
            ">=" => a >= b,
            "<" => a < b,
            "<=" => a <= b,
            "==" => a == b,
            "!=" => a != b,
            _ => return Err(format!("unsupported operator '{op}'")),
        });
    }
    match op {
        "==" => Ok(lhs == rhs),
        "!=" => Ok(lhs != rhs),
        _ => Err(format!("operator '{op}' requires numeric operands")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_success_reads_the_named_boolean() {
        let context = serde_json::json!({ "all_success": true, "any_failure": false });
        assert!(evaluate("all_success", &context));
        assert!(!evaluate("any_failure", &context));
    }

    #[test]
    fn dotted_path_length_comparison() {
        let context = serde_json::json!({ "data": { "changes": [1, 2, 3] } });
        assert!(evaluate("data.changes.length > 0", &context));
        assert!(!evaluate("data.changes.length > 10", &context));
    }

    #[test]
    fn bare_path_is_an_existence_check() {
        let context = serde_json::json!({ "data": { "next_team": "fallback" } });
        assert!(evaluate("data.next_team", &context));
        assert!(!evaluate("data.missing_field", &context));
    }

    #[test]
    fn unresolvable_path_in_a_comparison_is_false_not_a_panic() {
        let context = serde_json::json!({});
        assert!(!evaluate("data.changes.length > 0", &context));
    }

    #[test]
    fn string_equality_comparison() {
        let context = serde_json::json!({ "status": "error" });
        assert!(evaluate("status == error", &context));
        assert!(!evaluate("status == success", &context));
    }
}
