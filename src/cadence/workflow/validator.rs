// SPDX-License-Identifier: MIT

//! Output validators
//!
//! A validator is a pure function of the agent's final turn and the current
//! context. Its error messages are fed back to the agent on retry, so they
//! should say what to fix.

use super::state::Context;
use crate::adk::agent::TurnResult;
use crate::adk::error::{CadenceError, Result};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*\n([\s\S]*?)\n```").expect("fence pattern is valid")
});

static BRACKETED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\{[\s\S]*\}|\[[\s\S]*\])").expect("bracket pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            valid: false,
            errors: errors.into_iter().map(Into::into).collect(),
        }
    }
}

pub trait Validator: Send + Sync {
    fn validate(&self, result: &TurnResult, context: &Context) -> ValidationResult;
}

impl<F> Validator for F
where
    F: Fn(&TurnResult, &Context) -> ValidationResult + Send + Sync,
{
    fn validate(&self, result: &TurnResult, context: &Context) -> ValidationResult {
        self(result, context)
    }
}

/// Rejects blank output
pub struct NonEmptyValidator;

impl Validator for NonEmptyValidator {
    fn validate(&self, result: &TurnResult, _context: &Context) -> ValidationResult {
        if result.content.trim().is_empty() {
            ValidationResult::invalid(["The response was empty. Provide the requested output."])
        } else {
            ValidationResult::ok()
        }
    }
}

/// Requires a JSON payload matching a schema
pub struct SchemaValidator {
    schema: Value,
    compiled: JSONSchema,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schema", &self.schema)
            .finish()
    }
}

impl SchemaValidator {
    pub fn new(schema: Value) -> Result<Self> {
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| CadenceError::config(format!("invalid JSON schema: {}", e)))?;
        Ok(Self { schema, compiled })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Extract the payload from `content` and check it against the schema
    pub fn parse(&self, content: &str) -> std::result::Result<Value, Vec<String>> {
        let value = extract_json(content).map_err(|e| vec![e])?;
        if let Err(errors) = self.compiled.validate(&value) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            return Err(messages);
        }
        Ok(value)
    }
}

impl Validator for SchemaValidator {
    fn validate(&self, result: &TurnResult, _context: &Context) -> ValidationResult {
        match self.parse(&result.content) {
            Ok(_) => ValidationResult::ok(),
            Err(errors) => ValidationResult::invalid(errors),
        }
    }
}

/// Pull a JSON value out of agent text: a fenced block first, then the
/// outermost `{...}` or `[...]` span, then the whole trimmed text.
pub fn extract_json(content: &str) -> std::result::Result<Value, String> {
    if let Some(caps) = FENCED_JSON.captures(content) {
        if let Ok(value) = serde_json::from_str(caps[1].trim()) {
            return Ok(value);
        }
    }
    if let Some(caps) = BRACKETED_JSON.captures(content) {
        if let Ok(value) = serde_json::from_str(&caps[1]) {
            return Ok(value);
        }
    }
    serde_json::from_str(content.trim()).map_err(|e| {
        format!(
            "Output is not valid JSON ({}). Respond with only the JSON payload.",
            e
        )
    })
}
