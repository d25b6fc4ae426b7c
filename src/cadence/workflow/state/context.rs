// SPDX-License-Identifier: MIT

//! Context store shared by all steps of a run

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Ordered key/value store. Entries can be added or overwritten, never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    entries: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Look up a nested value using dot notation (e.g. `scan_data.findings.0.title`).
    /// Numeric segments index into arrays.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.entries.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into this context, overwriting clashing keys
    pub fn extend(&mut self, other: Context) {
        self.entries.extend(other.entries);
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = Context::new();
        for (k, v) in iter {
            context.insert(k, v);
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_overwrites() {
        let mut context = Context::new();
        context.insert("target", "contracts/");
        context.insert("target", "src/");
        assert_eq!(context.get("target"), Some(&json!("src/")));
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn test_get_path_traverses_objects_and_arrays() {
        let mut context = Context::new();
        context.insert(
            "scan_data",
            json!({"findings": [{"title": "reentrancy"}, {"title": "overflow"}]}),
        );

        assert_eq!(
            context.get_path("scan_data.findings.1.title"),
            Some(&json!("overflow"))
        );
        assert!(context.get_path("scan_data.findings.7").is_none());
        assert!(context.get_path("scan_data.missing").is_none());
        assert!(context.get_path("absent").is_none());
    }

    #[test]
    fn test_serializes_as_sorted_plain_object() {
        let context: Context = vec![("b", json!(2)), ("a", json!(1))].into_iter().collect();
        assert_eq!(serde_json::to_string(&context).unwrap(), r#"{"a":1,"b":2}"#);
        let back: Context = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        assert_eq!(back, context);
    }
}
