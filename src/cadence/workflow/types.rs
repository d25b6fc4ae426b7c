// SPDX-License-Identifier: MIT

//! YAML schema types for workflow definitions
//!
//! These are the authoring-side shapes. `StepDefinition` uses flatter,
//! friendlier field names than `StepSpec` and is converted by the builder.

use super::dynamic::{ExtractionOptions, ForEachGenerator};
use super::step::{ConditionSpec, StepSpec, ValidatorSpec, DEFAULT_MAX_RETRIES};
use crate::adk::error::{CadenceError, Result};
use crate::cadence::config::EngineSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Top-level workflow definition
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides for the engine configuration
    #[serde(default)]
    pub settings: EngineSettings,
    /// Initial context entries
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub extractions: Vec<ExtractionDefinition>,
    #[serde(default)]
    pub expansions: Vec<ExpansionDefinition>,
}

/// A single step
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub name: String,
    pub prompt: String,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub validate: Option<ValidateDefinition>,
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub max_cost_retry: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub continue_session: bool,
    /// Condition expression, e.g. `scan_data.count > 0`
    #[serde(default)]
    pub when: Option<String>,
    /// Name of a registered condition
    #[serde(default)]
    pub condition: Option<String>,
}

/// Exactly one of the fields must be set
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ValidateDefinition {
    #[serde(default)]
    pub non_empty: bool,
    #[serde(default)]
    pub schema: Option<Value>,
    /// Name of a registered validator
    #[serde(default)]
    pub validator: Option<String>,
}

/// Extraction step inserted after `after`
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExtractionDefinition {
    pub after: String,
    pub schema: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context_key: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// One generated step per element of a context array, inserted after `after` completes
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExpansionDefinition {
    pub after: String,
    /// Context path of the array, e.g. `scan_data.files`
    pub items: String,
    #[serde(default)]
    pub item_var: Option<String>,
    pub step: StepDefinition,
}

impl ValidateDefinition {
    pub fn to_spec(&self, step: &str) -> Result<ValidatorSpec> {
        let mut specs = Vec::new();
        if self.non_empty {
            specs.push(ValidatorSpec::NonEmpty);
        }
        if let Some(schema) = &self.schema {
            specs.push(ValidatorSpec::Schema(schema.clone()));
        }
        if let Some(name) = &self.validator {
            specs.push(ValidatorSpec::Named(name.clone()));
        }
        match specs.len() {
            1 => Ok(specs.remove(0)),
            0 => Err(CadenceError::config(format!(
                "step '{}': validate needs one of non_empty, schema or validator",
                step
            ))),
            _ => Err(CadenceError::config(format!(
                "step '{}': validate accepts only one of non_empty, schema or validator",
                step
            ))),
        }
    }
}

impl StepDefinition {
    pub fn to_step_spec(&self) -> Result<StepSpec> {
        if self.name.trim().is_empty() {
            return Err(CadenceError::config("step name must not be empty"));
        }

        let condition = match (&self.when, &self.condition) {
            (Some(_), Some(_)) => {
                return Err(CadenceError::config(format!(
                    "step '{}': set either 'when' or 'condition', not both",
                    self.name
                )))
            }
            (Some(expr), None) => Some(ConditionSpec::Expr(expr.clone())),
            (None, Some(name)) => Some(ConditionSpec::Named(name.clone())),
            (None, None) => None,
        };

        let validator = self
            .validate
            .as_ref()
            .map(|v| v.to_spec(&self.name))
            .transpose()?;

        Ok(StepSpec {
            name: self.name.clone(),
            prompt_template: self.prompt.clone(),
            allowed_tools: self.allowed_tools.clone(),
            disallowed_tools: self.disallowed_tools.clone(),
            validator,
            max_cost_initial: self.max_cost,
            max_cost_retry: self.max_cost_retry,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            continue_session: self.continue_session,
            condition,
            extraction: None,
        })
    }
}

impl ExtractionDefinition {
    pub fn to_options(&self) -> ExtractionOptions {
        let mut options = ExtractionOptions::new(self.schema.clone());
        options.step_name = self.name.clone();
        options.context_key = self.context_key.clone();
        options.prompt = self.prompt.clone();
        if let Some(max_cost) = self.max_cost {
            options.max_cost = max_cost;
        }
        if let Some(max_retries) = self.max_retries {
            options.max_retries = max_retries;
        }
        options
    }
}

impl ExpansionDefinition {
    pub fn to_generator(&self) -> Result<ForEachGenerator> {
        let mut generator = ForEachGenerator::new(self.items.clone(), self.step.to_step_spec()?);
        if let Some(var) = &self.item_var {
            generator.item_var = var.clone();
        }
        Ok(generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(name: &str) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            prompt: "do it".to_string(),
            allowed_tools: None,
            disallowed_tools: None,
            validate: None,
            max_cost: Some(2.0),
            max_cost_retry: None,
            max_retries: None,
            continue_session: false,
            when: None,
            condition: None,
        }
    }

    #[test]
    fn test_step_conversion_defaults() {
        let spec = step("scan").to_step_spec().unwrap();
        assert_eq!(spec.name, "scan");
        assert_eq!(spec.prompt_template, "do it");
        assert_eq!(spec.max_cost_initial, Some(2.0));
        assert_eq!(spec.retry_budget(), Some(2.0));
        assert_eq!(spec.max_retries, DEFAULT_MAX_RETRIES);
        assert!(spec.validator.is_none());
        assert!(spec.condition.is_none());
    }

    #[test]
    fn test_condition_fields_are_exclusive() {
        let mut def = step("scan");
        def.when = Some("flag".into());
        assert_eq!(
            def.to_step_spec().unwrap().condition,
            Some(ConditionSpec::Expr("flag".into()))
        );

        def.condition = Some("has_findings".into());
        assert!(matches!(def.to_step_spec(), Err(CadenceError::Config(_))));

        def.when = None;
        assert_eq!(
            def.to_step_spec().unwrap().condition,
            Some(ConditionSpec::Named("has_findings".into()))
        );
    }

    #[test]
    fn test_validate_requires_exactly_one_kind() {
        let none = ValidateDefinition::default();
        assert!(none.to_spec("s").is_err());

        let both = ValidateDefinition {
            non_empty: true,
            schema: Some(json!({"type": "object"})),
            validator: None,
        };
        assert!(both.to_spec("s").is_err());

        let named = ValidateDefinition {
            validator: Some("strict".into()),
            ..Default::default()
        };
        assert_eq!(
            named.to_spec("s").unwrap(),
            ValidatorSpec::Named("strict".into())
        );
    }

    #[test]
    fn test_extraction_options_keep_defaults_when_unset() {
        let def = ExtractionDefinition {
            after: "scan".into(),
            schema: json!({"type": "object"}),
            name: None,
            context_key: Some("findings".into()),
            prompt: None,
            max_cost: None,
            max_retries: Some(1),
        };
        let options = def.to_options();
        assert_eq!(options.context_key.as_deref(), Some("findings"));
        assert_eq!(options.max_cost, 0.5);
        assert_eq!(options.max_retries, 1);
    }
}
