/// Runtime parameter validation and injection
///
/// Validates caller-supplied values against a flow's declared parameter schema
/// and produces an execution-time copy of the flow with the values written into
/// their target nodes' configuration. The stored definition is never mutated.

use crate::flow::types::{Flow, ParameterDefinition, ParameterType};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

/// Outcome of validating a parameter value set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct ParameterInjector;

impl ParameterInjector {
    /// Check `values` against `schema`
    ///
    /// Missing required values and type or constraint violations are errors.
    /// Keys the schema does not declare are warnings and pass through unused.
    pub fn validate(schema: &[ParameterDefinition], values: &Map<String, Value>) -> ParameterValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for definition in schema {
            match values.get(&definition.name).filter(|v| !is_empty(v)) {
                None if definition.required && definition.default.is_none() => {
                    errors.push(format!("parameter '{}' is required", definition.name));
                }
                None => {}
                Some(value) => {
                    if let Err(reason) = check_value(definition, value) {
                        errors.push(format!("parameter '{}' {}", definition.name, reason));
                    }
                }
            }
        }

        for key in values.keys() {
            if !schema.iter().any(|definition| &definition.name == key) {
                warnings.push(format!("unknown parameter '{key}' will be ignored"));
            }
        }

        ParameterValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Deep-copy `definition` and write every supplied (or defaulted) value into
    /// its target node's configuration
    ///
    /// A parameter that targets a node missing from the definition is skipped
    /// with a warning.
    pub fn apply(definition: &Flow, schema: &[ParameterDefinition], values: &Map<String, Value>) -> Flow {
        let mut flow = definition.clone();

        for parameter in schema {
            let supplied = values
                .get(&parameter.name)
                .filter(|v| !is_empty(v))
                .or(parameter.default.as_ref());
            let Some(value) = supplied else {
                continue;
            };

            let Some(node) = flow.node_mut(&parameter.node_id) else {
                tracing::warn!(
                    "⚠️ Parameter '{}' targets unknown node '{}' in flow {}, skipping",
                    parameter.name,
                    parameter.node_id,
                    definition.id
                );
                continue;
            };

            node.config
                .insert(parameter.node_parameter.clone(), coerce(parameter.param_type, value));
        }

        flow
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn is_date(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").is_ok()
}

fn check_value(definition: &ParameterDefinition, value: &Value) -> Result<(), String> {
    let constraints = &definition.constraints;

    match definition.param_type {
        ParameterType::String => {
            let text = value.as_str().ok_or("must be a string")?;
            let length = text.chars().count();
            if let Some(min) = constraints.min_length {
                if length < min {
                    return Err(format!("must be at least {min} characters"));
                }
            }
            if let Some(max) = constraints.max_length {
                if length > max {
                    return Err(format!("must be at most {max} characters"));
                }
            }
            if let Some(pattern) = &constraints.pattern {
                let re = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|_| format!("has an invalid pattern '{pattern}'"))?;
                if !re.is_match(text) {
                    return Err(format!("must match pattern '{pattern}'"));
                }
            }
        }
        ParameterType::Number => {
            let number = as_number(value).ok_or("must be a number")?;
            if let Some(min) = constraints.min {
                if number < min {
                    return Err(format!("must be >= {min}"));
                }
            }
            if let Some(max) = constraints.max {
                if number > max {
                    return Err(format!("must be <= {max}"));
                }
            }
        }
        ParameterType::Boolean => {
            as_bool(value).ok_or("must be a boolean")?;
        }
        ParameterType::Date => {
            let text = value.as_str().ok_or("must be a date string")?;
            if !is_date(text) {
                return Err(format!("is not a valid date: '{text}'"));
            }
        }
        ParameterType::Select => {
            if !constraints.options.contains(value) {
                return Err("is not one of the allowed options".to_string());
            }
        }
        ParameterType::Json => {
            if let Value::String(raw) = value {
                serde_json::from_str::<Value>(raw).map_err(|e| format!("is not valid JSON: {e}"))?;
            }
        }
    }

    Ok(())
}

/// Normalize textual form input into the declared type; values that do not
/// convert are written unchanged
fn coerce(param_type: ParameterType, value: &Value) -> Value {
    match param_type {
        ParameterType::Number => as_number(value)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        ParameterType::Boolean => as_bool(value).map(Value::Bool).unwrap_or_else(|| value.clone()),
        ParameterType::Json => match value {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| value.clone()),
            other => other.clone(),
        },
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<ParameterDefinition> {
        serde_json::from_value(json!([
            { "name": "setpoint", "node_id": "n1", "node_parameter": "value", "type": "number",
              "required": true, "constraints": { "min": 0, "max": 200 } },
            { "name": "tag", "node_id": "n2", "node_parameter": "tag", "type": "string",
              "constraints": { "pattern": "[A-Z]+-[0-9]+", "max_length": 12 } },
            { "name": "mode", "node_id": "n2", "node_parameter": "mode", "type": "select",
              "constraints": { "options": ["auto", "manual"] } },
            { "name": "since", "node_id": "n2", "node_parameter": "since", "type": "date" },
            { "name": "extra", "node_id": "n2", "node_parameter": "extra", "type": "json" },
            { "name": "ghost", "node_id": "missing", "node_parameter": "x", "type": "boolean" }
        ]))
        .unwrap()
    }

    fn flow() -> Flow {
        serde_json::from_value(json!({
            "id": "f1",
            "name": "f1",
            "nodes": [
                { "id": "n1", "node_type": "constant", "config": { "value": 1 } },
                { "id": "n2", "node_type": "passthrough" }
            ]
        }))
        .unwrap()
    }

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_required_value_is_an_error() {
        let result = ParameterInjector::validate(&schema(), &values(json!({ "setpoint": "" })));
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["parameter 'setpoint' is required"]);
    }

    #[test]
    fn type_and_constraint_violations() {
        let result = ParameterInjector::validate(
            &schema(),
            &values(json!({
                "setpoint": 500,
                "tag": "tt-1",
                "mode": "turbo",
                "since": "yesterday",
                "extra": "{not json"
            })),
        );
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 5);
        assert!(result.errors[0].contains("<= 200"));
        assert!(result.errors[1].contains("pattern"));
    }

    #[test]
    fn valid_values_with_unknown_key_warn_only() {
        let result = ParameterInjector::validate(
            &schema(),
            &values(json!({
                "setpoint": "150",
                "tag": "TT-101",
                "mode": "auto",
                "since": "2024-05-01",
                "extra": "{\"a\": 1}",
                "bogus": 1
            })),
        );
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.warnings, vec!["unknown parameter 'bogus' will be ignored"]);
    }

    #[test]
    fn apply_writes_values_into_targets() {
        let original = flow();
        let applied = ParameterInjector::apply(
            &original,
            &schema(),
            &values(json!({ "setpoint": "150", "mode": "manual", "extra": "{\"a\": 1}", "ghost": true })),
        );

        let n1 = applied.node("n1").unwrap();
        assert_eq!(n1.config["value"], json!(150.0));
        let n2 = applied.node("n2").unwrap();
        assert_eq!(n2.config["mode"], json!("manual"));
        assert_eq!(n2.config["extra"], json!({ "a": 1 }));
        assert!(!n2.config.contains_key("tag"));
    }

    #[test]
    fn apply_never_touches_the_original() {
        let original = flow();
        let before = serde_json::to_vec(&original).unwrap();

        let first = ParameterInjector::apply(&original, &schema(), &values(json!({ "setpoint": 10, "tag": "A-1" })));
        let second = ParameterInjector::apply(&original, &schema(), &values(json!({ "setpoint": 20 })));

        assert_eq!(first.node("n1").unwrap().config["value"], json!(10.0));
        assert_eq!(second.node("n1").unwrap().config["value"], json!(20.0));
        assert!(!second.node("n2").unwrap().config.contains_key("tag"));
        assert_eq!(serde_json::to_vec(&original).unwrap(), before);
    }

    #[test]
    fn defaults_fill_missing_values() {
        let mut schema = schema();
        schema[0].default = Some(json!(75));

        let result = ParameterInjector::validate(&schema, &Map::new());
        assert!(result.valid);

        let applied = ParameterInjector::apply(&flow(), &schema, &Map::new());
        assert_eq!(applied.node("n1").unwrap().config["value"], json!(75.0));
    }
}
