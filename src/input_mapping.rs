//! Resolves `${...}` references inside a step's `input_mapping` against
//! prior step results and the execution's initial context.

use std::collections::HashMap;

use serde_json::Value;

/// Resolve `input_mapping`, replacing every leaf string of the form
/// `${step_id.path}` or `${input.path}`. Missing references resolve to
/// `null` and are reported through `warnings` rather than failing the step.
pub fn resolve(
    input_mapping: &Value,
    step_results: &HashMap<String, Value>,
    initial_context: &Value,
    warnings: &mut Vec<String>,
) -> Value {
    match input_mapping {
        Value::String(s) => resolve_string(s, step_results, initial_context, warnings),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve(v, step_results, initial_context, warnings))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, step_results, initial_context, warnings)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(
    s: &str,
    step_results: &HashMap<String, Value>,
    initial_context: &Value,
    warnings: &mut Vec<String>,
) -> Value {
    let Some(reference) = parse_reference(s) else {
        return Value::String(s.to_string());
    };

    let mut parts = reference.splitn(2, '.');
    let Some(head) = parts.next() else {
        return missing(s, warnings);
    };
    let rest = parts.next().unwrap_or("");

    if head == "input" {
        return lookup_path(initial_context, rest).unwrap_or_else(|| missing(s, warnings));
    }

    let Some(result) = step_results.get(head) else {
        return missing(s, warnings);
    };

    if rest == "result" || rest.is_empty() {
        return result.clone();
    }

    lookup_path(result, rest).unwrap_or_else(|| missing(s, warnings))
}

fn parse_reference(s: &str) -> Option<&str> {
    s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
}

fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn missing(reference: &str, warnings: &mut Vec<String>) -> Value {
    warnings.push(format!("unresolved reference {reference}, substituted null"));
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaves_plain_strings_untouched() {
        let mut warnings = Vec::new();
        let resolved = resolve(&json!("plain"), &HashMap::new(), &json!({}), &mut warnings);
        assert_eq!(resolved, json!("plain"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn resolves_whole_step_result() {
        let mut results = HashMap::new();
        results.insert("a".to_string(), json!({"x": 1, "y": 2}));
        let mut warnings = Vec::new();
        let resolved = resolve(&json!("${a.result}"), &results, &json!({}), &mut warnings);
        assert_eq!(resolved, json!({"x": 1, "y": 2}));
        assert!(warnings.is_empty());
    }

    #[test]
    fn resolves_nested_field_of_step_result() {
        let mut results = HashMap::new();
        results.insert("a".to_string(), json!({"x": {"y": 42}}));
        let mut warnings = Vec::new();
        let resolved = resolve(&json!("${a.x.y}"), &results, &json!({}), &mut warnings);
        assert_eq!(resolved, json!(42));
        assert!(warnings.is_empty());
    }

    #[test]
    fn resolves_initial_context_field() {
        let mut warnings = Vec::new();
        let resolved = resolve(&json!("${input.customer_id}"), &HashMap::new(), &json!({"customer_id": "c1"}), &mut warnings);
        assert_eq!(resolved, json!("c1"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn missing_reference_resolves_to_null_with_warning() {
        let mut warnings = Vec::new();
        let resolved = resolve(&json!("${ghost.result}"), &HashMap::new(), &json!({}), &mut warnings);
        assert_eq!(resolved, Value::Null);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn recurses_into_nested_objects_and_arrays() {
        let mut results = HashMap::new();
        results.insert("a".to_string(), json!({"v": 7}));
        let mut warnings = Vec::new();
        let mapping = json!({"nested": ["${a.v}", "${input.k}"]});
        let resolved = resolve(&mapping, &results, &json!({"k": "v1"}), &mut warnings);
        assert_eq!(resolved, json!({"nested": [7, "v1"]}));
    }
}
