//! Execution Context: the data a workflow run reads and writes.

use serde::Serialize;
use serde_json::{Map, Value};

/// Ordered string-keyed JSON map used for context data and partial updates.
pub type ContextMap = Map<String, Value>;

/// Keys that carry run configuration rather than workflow data.
pub const CONFIG_KEYS: &[&str] = &[
    "model_id",
    "temperature",
    "max_tokens",
    "timeout",
    "sandbox_endpoint",
];

/// Keys that carry engine bookkeeping rather than workflow data.
pub const METADATA_KEYS: &[&str] = &["branch_decision", "workflow_id", "execution_id", "user_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass {
    Functional,
    Config,
    Metadata,
}

impl KeyClass {
    pub fn of(key: &str) -> Self {
        if CONFIG_KEYS.contains(&key) {
            Self::Config
        } else if METADATA_KEYS.contains(&key) {
            Self::Metadata
        } else {
            Self::Functional
        }
    }
}

/// Context of one workflow run.
///
/// `initial` is frozen when the run starts; `current` accumulates node updates.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    initial: ContextMap,
    current: ContextMap,
}

impl ExecutionContext {
    pub fn new(initial: ContextMap) -> Self {
        let initial: ContextMap = initial
            .into_iter()
            .map(|(k, v)| {
                let v = sanitize(&k, v);
                (k, v)
            })
            .collect();
        Self {
            current: initial.clone(),
            initial,
        }
    }

    pub fn initial(&self) -> &ContextMap {
        &self.initial
    }

    /// Borrowed view of the current data, for handing to an executor.
    pub fn view(&self) -> &ContextMap {
        &self.current
    }

    /// Independent deep copy of the current data, for audit records.
    pub fn snapshot(&self) -> ContextMap {
        self.current.clone()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.current.get(key)
    }

    /// Insert any serializable value. Values that cannot be represented as
    /// JSON are stored as a descriptive placeholder instead.
    pub fn set<T: Serialize + ?Sized>(&mut self, key: impl Into<String>, value: &T) {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(v) => sanitize(&key, v),
            Err(e) => placeholder(&key, std::any::type_name::<T>(), &e.to_string()),
        };
        self.current.insert(key, value);
    }

    /// Merge a partial update into `current`. Keys absent from the update
    /// are left untouched.
    pub fn merge(&mut self, update: ContextMap) {
        for (key, value) in update {
            let value = sanitize(&key, value);
            self.current.insert(key, value);
        }
    }

    /// Consume the context, returning the final data.
    pub fn into_current(self) -> ContextMap {
        self.current
    }

    fn filtered(&self, class: KeyClass) -> ContextMap {
        self.current
            .iter()
            .filter(|(k, _)| KeyClass::of(k) == class)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Workflow data only: neither config nor metadata keys.
    pub fn functional_view(&self) -> ContextMap {
        self.filtered(KeyClass::Functional)
    }

    pub fn config_view(&self) -> ContextMap {
        self.filtered(KeyClass::Config)
    }

    pub fn metadata_view(&self) -> ContextMap {
        self.filtered(KeyClass::Metadata)
    }
}

/// Functional entries of an arbitrary context map.
pub fn functional_entries(context: &ContextMap) -> ContextMap {
    context
        .iter()
        .filter(|(k, _)| KeyClass::of(k) == KeyClass::Functional)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// JSON type name of a value, as reported in context schemas.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Round-trip a value through its serialized form before accepting it.
fn sanitize(key: &str, value: Value) -> Value {
    match serde_json::to_string(&value).and_then(|s| serde_json::from_str::<Value>(&s)) {
        Ok(round_tripped) => round_tripped,
        Err(e) => placeholder(key, type_name(&value), &e.to_string()),
    }
}

fn placeholder(key: &str, type_name: &str, reason: &str) -> Value {
    tracing::warn!(key, type_name, reason, "non-serializable context value replaced");
    Value::String(format!("<non-serializable {type_name}: {reason}>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn map(v: Value) -> ContextMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn merge_preserves_untouched_keys() {
        let mut ctx = ExecutionContext::new(map(json!({"a": 1, "b": 2})));
        ctx.merge(map(json!({"b": 3, "c": 4})));
        assert_eq!(ctx.view(), &map(json!({"a": 1, "b": 3, "c": 4})));
        assert_eq!(ctx.initial(), &map(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn snapshot_is_independent() {
        let mut ctx = ExecutionContext::new(map(json!({"items": [1, 2]})));
        let snap = ctx.snapshot();
        ctx.merge(map(json!({"items": [1, 2, 3]})));
        assert_eq!(snap["items"], json!([1, 2]));
    }

    #[test]
    fn non_serializable_value_becomes_placeholder() {
        // JSON object keys must be strings; a tuple-keyed map cannot serialize.
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);

        let mut ctx = ExecutionContext::new(ContextMap::new());
        ctx.set("bad", &bad);
        ctx.set("good", &vec![1, 2]);

        let placeholder = ctx.get("bad").and_then(Value::as_str).unwrap();
        assert!(placeholder.starts_with("<non-serializable"));
        assert_eq!(ctx.get("good"), Some(&json!([1, 2])));
    }

    #[test]
    fn views_partition_by_key_class() {
        let ctx = ExecutionContext::new(map(json!({
            "amount": 10,
            "model_id": "m-1",
            "branch_decision": "true"
        })));
        assert_eq!(ctx.functional_view(), map(json!({"amount": 10})));
        assert_eq!(ctx.config_view(), map(json!({"model_id": "m-1"})));
        assert_eq!(ctx.metadata_view(), map(json!({"branch_decision": "true"})));
    }

    #[test]
    fn context_keeps_insertion_order() {
        let mut ctx = ExecutionContext::new(ContextMap::new());
        ctx.set("z", &1);
        ctx.set("a", &2);
        let keys: Vec<&String> = ctx.view().keys().collect();
        assert_eq!(keys, ["z", "a"]);
    }
}
