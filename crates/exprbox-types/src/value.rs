//! Values crossing the host/isolate boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How much of a value a host read should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Primitives by value, containers as their shape only.
    Shallow,
    /// The whole subtree, materialized.
    Full,
}

/// Host answer to a data read.
///
/// Shallow reads of containers return only their shape so the isolate can
/// build a lazy object whose own properties are fetched on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LazyValue {
    /// Nothing at this path. Surfaces as `undefined`.
    Missing,
    /// A non-container JSON value.
    Primitive { value: Value },
    /// An object; only the key list is transferred.
    Object { keys: Vec<String> },
    /// An array; only the length is transferred.
    Array { len: usize },
    /// A fully materialized subtree.
    Materialized { value: Value },
}

impl LazyValue {
    /// Describe `value` according to `mode`.
    pub fn from_value(value: &Value, mode: FetchMode) -> Self {
        match (mode, value) {
            (FetchMode::Full, v) => LazyValue::Materialized { value: v.clone() },
            (FetchMode::Shallow, Value::Object(map)) => LazyValue::Object {
                keys: map.keys().cloned().collect(),
            },
            (FetchMode::Shallow, Value::Array(items)) => LazyValue::Array { len: items.len() },
            (FetchMode::Shallow, v) => LazyValue::Primitive { value: v.clone() },
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, LazyValue::Missing)
    }
}

/// Result of an evaluation.
///
/// `undefined` has no JSON representation, so it is kept distinct from `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExprValue {
    Undefined,
    Json(Value),
}

impl ExprValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, ExprValue::Undefined)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ExprValue::Undefined => None,
            ExprValue::Json(v) => Some(v),
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            ExprValue::Undefined => None,
            ExprValue::Json(v) => Some(v),
        }
    }
}

impl From<Value> for ExprValue {
    fn from(value: Value) -> Self {
        ExprValue::Json(value)
    }
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprValue::Undefined => f.write_str("undefined"),
            ExprValue::Json(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shallow_object_exposes_only_keys() {
        let lazy = LazyValue::from_value(&json!({"b": 1, "c": {"deep": true}}), FetchMode::Shallow);
        match lazy {
            LazyValue::Object { mut keys } => {
                keys.sort();
                assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("expected object shape, got {other:?}"),
        }
    }

    #[test]
    fn shallow_array_exposes_length() {
        let lazy = LazyValue::from_value(&json!([1, 2, 3]), FetchMode::Shallow);
        assert_eq!(lazy, LazyValue::Array { len: 3 });
    }

    #[test]
    fn full_fetch_materializes() {
        let value = json!({"a": [1, {"b": 2}]});
        let lazy = LazyValue::from_value(&value, FetchMode::Full);
        assert_eq!(lazy, LazyValue::Materialized { value });
    }

    #[test]
    fn undefined_and_null_stay_distinct_on_the_wire() {
        let undefined = serde_json::to_string(&ExprValue::Undefined).expect("serialize");
        let null = serde_json::to_string(&ExprValue::Json(Value::Null)).expect("serialize");
        assert_ne!(undefined, null);
        let back: ExprValue = serde_json::from_str(&undefined).expect("deserialize");
        assert!(back.is_undefined());
    }

    #[test]
    fn display_renders_json_or_undefined() {
        assert_eq!(ExprValue::Undefined.to_string(), "undefined");
        assert_eq!(ExprValue::from(json!("a@b.com")).to_string(), "\"a@b.com\"");
    }
}
