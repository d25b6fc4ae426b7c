// SPDX-License-Identifier: MIT

//! Prompt template resolution
//!
//! Placeholders are `{{ name }}` or `{{ name.path.0 }}`. Strings are inserted
//! as-is, any other JSON value as pretty-printed JSON.

use super::state::Context;
use crate::adk::error::TemplateError;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Resolves placeholders from built-in variables and the run context.
/// Context entries shadow built-ins with the same name.
pub struct TemplateResolver<'a> {
    builtins: BTreeMap<String, Value>,
    context: &'a Context,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(context: &'a Context) -> Self {
        Self {
            builtins: BTreeMap::new(),
            context,
        }
    }

    /// Resolver with the `working_dir`, `execution_dir` and `results_dir` built-ins
    pub fn with_dirs(
        context: &'a Context,
        working_dir: &Path,
        execution_dir: &Path,
        results_dir: &Path,
    ) -> Self {
        Self::new(context)
            .with_builtin("working_dir", working_dir.display().to_string())
            .with_builtin("execution_dir", execution_dir.display().to_string())
            .with_builtin("results_dir", results_dir.display().to_string())
    }

    pub fn with_builtin(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.builtins.insert(name.into(), value.into());
        self
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        self.context.get_path(path).or_else(|| {
            let mut parts = path.split('.');
            let root = self.builtins.get(parts.next()?)?;
            parts.try_fold(root, |value, part| match value {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?),
                other => other.get(part),
            })
        })
    }

    /// Substitute every placeholder, failing with the full list of unresolved names
    pub fn resolve(&self, template: &str) -> Result<String, TemplateError> {
        let mut missing: Vec<String> = Vec::new();
        let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
            let path = &caps[1];
            match self.lookup(path) {
                Some(value) => render_value(value),
                None => {
                    if !missing.iter().any(|m| m == path) {
                        missing.push(path.to_string());
                    }
                    caps[0].to_string()
                }
            }
        });

        if missing.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(TemplateError::Unresolved { names: missing })
        }
    }
}

/// Substitute only the placeholders `vars` can answer and keep the rest verbatim
pub fn render_partial(template: &str, vars: &Context) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match vars.get_path(&caps[1]) {
            Some(value) => render_value(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Placeholder paths in order of first appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        if !names.iter().any(|n| n == &caps[1]) {
            names.push(caps[1].to_string());
        }
    }
    names
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolves_context_and_builtins() {
        let mut context = Context::new();
        context.insert("target", "contracts/Vault.sol");
        context.insert("scan_data", json!({"findings": [{"title": "reentrancy"}]}));

        let resolver = TemplateResolver::with_dirs(
            &context,
            Path::new("/tmp/run"),
            Path::new("/repo"),
            Path::new("/tmp/run/results"),
        );
        let out = resolver
            .resolve("{{target}} in {{ execution_dir }}: {{ scan_data.findings.0.title }}")
            .unwrap();
        assert_eq!(out, "contracts/Vault.sol in /repo: reentrancy");
    }

    #[test]
    fn test_context_shadows_builtins() {
        let mut context = Context::new();
        context.insert("working_dir", "/override");
        let resolver = TemplateResolver::new(&context).with_builtin("working_dir", "/builtin");
        assert_eq!(resolver.resolve("{{ working_dir }}").unwrap(), "/override");
    }

    #[test]
    fn test_non_string_values_are_pretty_json() {
        let mut context = Context::new();
        context.insert("files", json!(["a.sol", "b.sol"]));
        context.insert("count", json!(2));
        let out = TemplateResolver::new(&context)
            .resolve("{{ count }} files: {{ files }}")
            .unwrap();
        assert_eq!(out, "2 files: [\n  \"a.sol\",\n  \"b.sol\"\n]");
    }

    #[test]
    fn test_unresolved_placeholders_are_reported_together() {
        let context = Context::new();
        let err = TemplateResolver::new(&context)
            .resolve("{{ a }} {{ b.c }} {{ a }}")
            .unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                names: vec!["a".into(), "b.c".into()]
            }
        );
    }

    #[test]
    fn test_text_without_placeholders_is_untouched() {
        let context = Context::new();
        let text = "JSON like {\"a\": {\"b\": 1}} stays { put }";
        assert_eq!(TemplateResolver::new(&context).resolve(text).unwrap(), text);
    }

    #[test]
    fn test_render_partial_leaves_unknown_placeholders() {
        let mut vars = Context::new();
        vars.insert("item", json!({"file": "Vault.sol"}));
        vars.insert("index", 0);
        let out = render_partial(
            "Review {{ item.file }} (#{{index}}) in {{ working_dir }}",
            &vars,
        );
        assert_eq!(out, "Review Vault.sol (#0) in {{ working_dir }}");
        assert_eq!(placeholders(&out), vec!["working_dir"]);
    }
}
