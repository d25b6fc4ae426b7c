// SPDX-License-Identifier: MIT

//! Runtime step generation and schema extraction steps
//!
//! A generator bound to a trigger step runs once after the trigger succeeds
//! and returns steps to splice in right after it. Extraction steps continue
//! the trigger's session and ask the agent to restate its findings as JSON
//! matching a schema.

use super::state::Context;
use super::step::{StepSpec, ValidatorSpec};
use super::template::render_partial;
use crate::adk::agent::TurnResult;
use crate::adk::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;

/// Produces steps from a completed step's result
pub trait StepGenerator: Send + Sync {
    fn generate(
        &self,
        result: &TurnResult,
        context: &Context,
    ) -> std::result::Result<Vec<StepSpec>, Box<dyn Error + Send + Sync>>;
}

impl<F> StepGenerator for F
where
    F: Fn(&TurnResult, &Context) -> std::result::Result<Vec<StepSpec>, Box<dyn Error + Send + Sync>>
        + Send
        + Sync,
{
    fn generate(
        &self,
        result: &TurnResult,
        context: &Context,
    ) -> std::result::Result<Vec<StepSpec>, Box<dyn Error + Send + Sync>> {
        self(result, context)
    }
}

/// One step per element of a context array.
///
/// `{{ item }}` (or the configured variable) and `{{ index }}` are rendered
/// into the step name and prompt. Other placeholders are left for the
/// scheduler to resolve when the generated step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEachGenerator {
    /// Context path of the array to expand
    pub items: String,
    #[serde(default = "default_item_var")]
    pub item_var: String,
    pub template: StepSpec,
}

fn default_item_var() -> String {
    "item".to_string()
}

impl ForEachGenerator {
    pub fn new(items: impl Into<String>, template: StepSpec) -> Self {
        Self {
            items: items.into(),
            item_var: default_item_var(),
            template,
        }
    }
}

impl StepGenerator for ForEachGenerator {
    fn generate(
        &self,
        _result: &TurnResult,
        context: &Context,
    ) -> std::result::Result<Vec<StepSpec>, Box<dyn Error + Send + Sync>> {
        let items = match context.get_path(&self.items) {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(format!(
                    "'{}' is not an array (found {})",
                    self.items,
                    json_kind(other)
                )
                .into())
            }
            None => return Err(format!("'{}' is not in the context", self.items).into()),
        };

        let name_has_vars = self.template.name.contains("{{");
        let steps = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let mut vars = Context::new();
                vars.insert(self.item_var.clone(), item.clone());
                vars.insert("index", index);

                let mut step = self.template.clone();
                step.name = if name_has_vars {
                    render_partial(&self.template.name, &vars)
                } else {
                    format!("{}_{}", self.template.name, index)
                };
                step.prompt_template = render_partial(&self.template.prompt_template, &vars);
                step
            })
            .collect();
        Ok(steps)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Settings for an extraction step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOptions {
    pub schema: Value,
    /// Defaults to `{source}_extract`
    #[serde(default)]
    pub step_name: Option<String>,
    /// Defaults to `{source}_data`
    #[serde(default)]
    pub context_key: Option<String>,
    /// Replaces the generated prompt
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_extraction_cost")]
    pub max_cost: f64,
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,
}

fn default_extraction_cost() -> f64 {
    0.5
}

fn default_extraction_retries() -> u32 {
    3
}

impl ExtractionOptions {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            step_name: None,
            context_key: None,
            prompt: None,
            max_cost: default_extraction_cost(),
            max_retries: default_extraction_retries(),
        }
    }

    /// Options for the schema derived from `T`
    pub fn for_type<T: JsonSchema>() -> Result<Self> {
        Ok(Self::new(schema_for::<T>()?))
    }

    pub fn context_key(mut self, key: impl Into<String>) -> Self {
        self.context_key = Some(key.into());
        self
    }

    pub fn step_name(mut self, name: impl Into<String>) -> Self {
        self.step_name = Some(name.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = max_cost;
        self
    }
}

/// JSON schema for a Rust type
pub fn schema_for<T: JsonSchema>() -> Result<Value> {
    Ok(serde_json::to_value(schemars::schema_for!(T))?)
}

pub fn extraction_prompt(schema: &Value) -> String {
    let schema_json = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "Extract and format the relevant information from your previous responses as JSON.\n\n\
         Required JSON Schema:\n```json\n{}\n```\n\n\
         Output ONLY valid JSON matching the schema above. Do not include any additional text, \
         markdown formatting, or code blocks.",
        schema_json
    )
}

/// Build the extraction step for `source`
pub fn extraction_step(source: &str, options: &ExtractionOptions) -> StepSpec {
    let name = options
        .step_name
        .clone()
        .unwrap_or_else(|| format!("{}_extract", source));
    let context_key = options
        .context_key
        .clone()
        .unwrap_or_else(|| format!("{}_data", source));
    let prompt = options
        .prompt
        .clone()
        .unwrap_or_else(|| extraction_prompt(&options.schema));

    StepSpec::builder(name, prompt)
        .validator(ValidatorSpec::Schema(options.schema.clone()))
        .max_cost(options.max_cost)
        .max_retries(options.max_retries)
        .continue_session(true)
        .extraction(source, context_key)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::workflow::step::ExtractionSpec;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(JsonSchema)]
    struct Finding {
        title: String,
        severity: u8,
    }

    #[test]
    fn test_extraction_step_defaults() {
        let options = ExtractionOptions::new(json!({"type": "object"}));
        let step = extraction_step("scan", &options);

        assert_eq!(step.name, "scan_extract");
        assert!(step.continue_session);
        assert_eq!(step.max_cost_initial, Some(0.5));
        assert_eq!(step.max_retries, 3);
        assert_eq!(
            step.extraction,
            Some(ExtractionSpec {
                source_step: "scan".into(),
                context_key: "scan_data".into()
            })
        );
        let prompt = &step.prompt_template;
        assert!(prompt.contains("```json\n{\n  \"type\": \"object\"\n}\n```"));
        assert!(matches!(step.validator, Some(ValidatorSpec::Schema(_))));
    }

    #[test]
    fn test_extraction_step_overrides() {
        let options = ExtractionOptions::new(json!({}))
            .step_name("summarize")
            .context_key("summary")
            .prompt("Give me JSON")
            .max_cost(1.5);
        let step = extraction_step("scan", &options);
        assert_eq!(step.name, "summarize");
        assert_eq!(step.prompt_template, "Give me JSON");
        assert_eq!(step.extraction.unwrap().context_key, "summary");
        assert_eq!(step.max_cost_initial, Some(1.5));
    }

    #[test]
    fn test_schema_for_type() {
        let schema = schema_for::<Finding>().unwrap();
        assert_eq!(schema["properties"]["title"]["type"], "string");
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn test_for_each_generator() {
        let mut context = Context::new();
        context.insert(
            "scan_data",
            json!({"files": [{"path": "A.sol"}, {"path": "B.sol"}]}),
        );

        let template = StepSpec::builder(
            "review_{{ index }}",
            "Review {{ item.path }} in {{ working_dir }}",
        )
        .max_cost(1.0)
        .build();
        let generator = ForEachGenerator::new("scan_data.files", template);
        let steps = generator
            .generate(&TurnResult::default(), &context)
            .unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "review_0");
        assert_eq!(steps[1].prompt_template, "Review B.sol in {{ working_dir }}");
        assert_eq!(steps[1].max_cost_initial, Some(1.0));
    }

    #[test]
    fn test_for_each_without_placeholder_in_name_gets_suffix() {
        let mut context = Context::new();
        context.insert("files", json!(["a", "b"]));
        let generator = ForEachGenerator::new("files", StepSpec::new("check", "Check {{ item }}"));
        let names: Vec<String> = generator
            .generate(&TurnResult::default(), &context)
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["check_0", "check_1"]);
    }

    #[test]
    fn test_for_each_requires_array() {
        let mut context = Context::new();
        context.insert("files", "not a list");
        let generator = ForEachGenerator::new("files", StepSpec::new("x", "y"));
        let err = generator
            .generate(&TurnResult::default(), &context)
            .unwrap_err();
        assert!(err.to_string().contains("a string"));

        let err = generator
            .generate(&TurnResult::default(), &Context::new())
            .unwrap_err();
        assert!(err.to_string().contains("not in the context"));
    }
}
