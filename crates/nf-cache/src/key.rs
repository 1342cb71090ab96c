//! Cache key derivation.
//!
//! key = SHA256(normalize(task) + "::" + SHA256(context))
//!
//! The context digest walks the value tree with object keys in sorted order,
//! so insertion order never matters while any changed leaf changes the key.

use nf_core::context::ContextMap;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Trim and lower-case a task description.
pub fn normalize_task(task: &str) -> String {
    task.trim().to_lowercase()
}

/// Hex digest of a full context map.
pub fn context_digest(context: &ContextMap) -> String {
    let mut hasher = Sha256::new();
    digest_object(&mut hasher, context.iter());
    hex::encode(hasher.finalize())
}

/// Compute the cache key for a (task, context) pair.
pub fn compute_cache_key(task: &str, context: &ContextMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_task(task).as_bytes());
    hasher.update(b"::");
    hasher.update(context_digest(context).as_bytes());
    hex::encode(hasher.finalize())
}

fn digest_value(value: &Value) -> [u8; 32] {
    let mut hasher = Sha256::new();
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => {
            hasher.update(b"b");
            hasher.update([*b as u8]);
        }
        Value::Number(n) => {
            hasher.update(b"d");
            hasher.update(n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.update(b"s");
            update_framed(&mut hasher, s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"a");
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                hasher.update(digest_value(item));
            }
        }
        Value::Object(map) => digest_object(&mut hasher, map.iter()),
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn digest_object<'a>(hasher: &mut Sha256, entries: impl Iterator<Item = (&'a String, &'a Value)>) {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    hasher.update(b"o");
    hasher.update((entries.len() as u64).to_be_bytes());
    for (key, value) in entries {
        update_framed(hasher, key.as_bytes());
        hasher.update(digest_value(value));
    }
}

/// Length-prefix a byte string so adjacent fields cannot run together.
fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(v: Value) -> ContextMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn cache_key_deterministic() {
        let c = ctx(json!({"amount": 1500, "customer": {"tier": "gold", "tags": ["a", "b"]}}));
        let k1 = compute_cache_key("Flag large orders", &c);
        let k2 = compute_cache_key("Flag large orders", &c);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = ctx(json!({"x": 1, "y": {"p": true, "q": null}}));
        let b = ctx(json!({"y": {"q": null, "p": true}, "x": 1}));
        assert_eq!(compute_cache_key("t", &a), compute_cache_key("t", &b));
    }

    #[test]
    fn task_is_normalized() {
        let c = ctx(json!({"x": 1}));
        assert_eq!(
            compute_cache_key("  Sum The Column ", &c),
            compute_cache_key("sum the column", &c)
        );
    }

    #[test]
    fn any_leaf_change_changes_key() {
        let base = json!({"order": {"lines": [{"sku": "A1", "qty": 2}], "paid": false}, "note": "x"});
        let original = compute_cache_key("t", &ctx(base.clone()));

        let mutations: Vec<Box<dyn Fn(&mut Value)>> = vec![
            Box::new(|v: &mut Value| v["order"]["lines"][0]["sku"] = json!("A2")),
            Box::new(|v: &mut Value| v["order"]["lines"][0]["qty"] = json!(3)),
            Box::new(|v: &mut Value| v["order"]["paid"] = json!(true)),
            Box::new(|v: &mut Value| v["note"] = json!("y")),
            Box::new(|v: &mut Value| v["order"]["lines"][0]["qty"] = json!("2")),
        ];

        for mutate in mutations {
            let mut changed = base.clone();
            mutate(&mut changed);
            assert_ne!(original, compute_cache_key("t", &ctx(changed)));
        }
    }

    #[test]
    fn framing_prevents_concatenation_collisions() {
        let a = ctx(json!({"ab": "c"}));
        let b = ctx(json!({"a": "bc"}));
        assert_ne!(context_digest(&a), context_digest(&b));
        assert_ne!(
            context_digest(&ctx(json!({"v": [["a"], []]}))),
            context_digest(&ctx(json!({"v": [[], ["a"]]})))
        );
    }
}
