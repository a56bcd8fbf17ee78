// Workflow Conditions - predicate evaluation against event payloads

use serde::{Deserialize, Serialize};

/// A single condition to evaluate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    /// Field path to evaluate (supports dot notation for nested fields)
    pub field: String,
    /// Operator for comparison
    pub operator: ConditionOperator,
    /// Value to compare against
    pub value: serde_json::Value,
}

/// Condition operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Contains,
    Regex,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn eq(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, ConditionOperator::Eq, value)
    }

    pub fn ne(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, ConditionOperator::Ne, value)
    }

    pub fn gt(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Gt, serde_json::json!(value))
    }

    pub fn lt(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Lt, serde_json::json!(value))
    }

    pub fn gte(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Gte, serde_json::json!(value))
    }

    pub fn lte(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Lte, serde_json::json!(value))
    }

    pub fn in_list(field: &str, values: Vec<serde_json::Value>) -> Self {
        Self::new(field, ConditionOperator::In, serde_json::Value::Array(values))
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(
            field,
            ConditionOperator::Contains,
            serde_json::Value::String(value.to_string()),
        )
    }

    pub fn regex(field: &str, pattern: &str) -> Self {
        Self::new(
            field,
            ConditionOperator::Regex,
            serde_json::Value::String(pattern.to_string()),
        )
    }

    /// Evaluate this condition against a payload. Lookup or coercion
    /// failures yield `false`, never an error.
    pub fn evaluate(&self, payload: &serde_json::Value) -> bool {
        let actual = match lookup_path(payload, &self.field) {
            Some(v) => v,
            None => return false,
        };

        evaluate_operator(&actual, self.operator, &self.value)
    }

    /// Accepts the two stored shapes for condition sets: a list of
    /// `{field, operator, value}` objects, or a map of `field -> value`
    /// pairs treated as equality checks. Anything else normalizes to empty.
    pub fn normalize(raw: &serde_json::Value) -> Vec<Condition> {
        match raw {
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(field, value)| Condition::eq(field, value.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Evaluate a condition set against a payload. Conditions are
/// AND-combined; an empty set always matches.
pub fn evaluate_all(conditions: &[Condition], payload: &serde_json::Value) -> bool {
    conditions.iter().all(|c| c.evaluate(payload))
}

/// Resolve a dot-separated path against a JSON value. Any missing
/// segment yields `None`.
pub fn lookup_path(value: &serde_json::Value, path: &str) -> Option<serde_json::Value> {
    let mut current = value;

    for part in path.split('.') {
        match current.get(part) {
            Some(v) => current = v,
            None => return None,
        }
    }

    Some(current.clone())
}

fn evaluate_operator(
    actual: &serde_json::Value,
    operator: ConditionOperator,
    expected: &serde_json::Value,
) -> bool {
    match operator {
        ConditionOperator::Eq => coerce_string(actual) == coerce_string(expected),
        ConditionOperator::Ne => coerce_string(actual) != coerce_string(expected),
        ConditionOperator::Gt => numeric_compare(actual, expected, |a, e| a > e),
        ConditionOperator::Lt => numeric_compare(actual, expected, |a, e| a < e),
        ConditionOperator::Gte => numeric_compare(actual, expected, |a, e| a >= e),
        ConditionOperator::Lte => numeric_compare(actual, expected, |a, e| a <= e),
        ConditionOperator::In => match expected {
            serde_json::Value::Array(items) => {
                items.contains(actual)
                    || items.iter().any(|i| coerce_string(i) == coerce_string(actual))
            }
            serde_json::Value::String(s) => actual
                .as_str()
                .map(|a| s.contains(a))
                .unwrap_or(false),
            _ => false,
        },
        ConditionOperator::Contains => match actual {
            serde_json::Value::String(s) => expected
                .as_str()
                .map(|e| s.contains(e))
                .unwrap_or(false),
            serde_json::Value::Array(items) => {
                items.contains(expected)
                    || items.iter().any(|i| coerce_string(i) == coerce_string(expected))
            }
            _ => false,
        },
        ConditionOperator::Regex => {
            let pattern = match expected.as_str() {
                Some(p) => p,
                None => return false,
            };
            match regex::Regex::new(pattern) {
                Ok(re) => re.is_match(&coerce_string(actual)),
                Err(_) => false,
            }
        }
    }
}

fn numeric_compare(
    actual: &serde_json::Value,
    expected: &serde_json::Value,
    cmp: fn(f64, f64) -> bool,
) -> bool {
    match (coerce_f64(actual), coerce_f64(expected)) {
        (Some(a), Some(e)) => cmp(a, e),
        _ => false,
    }
}

fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
