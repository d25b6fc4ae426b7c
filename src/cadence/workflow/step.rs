// SPDX-License-Identifier: MIT

//! Step specifications
//!
//! A `StepSpec` is immutable once built and serializable, so the ledger can
//! be persisted verbatim (dynamically generated steps included). Validators
//! and conditions are referenced through descriptors that are resolved
//! against the workflow's registry at run time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How a step's output is validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorSpec {
    /// Output must contain non-whitespace text
    NonEmpty,
    /// Output must contain JSON matching this schema
    Schema(Value),
    /// A validator registered under this name
    Named(String),
}

/// When a step runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSpec {
    /// An expression in the condition language
    Expr(String),
    /// A condition registered under this name
    Named(String),
}

/// Marks a step whose output is a structured payload for another step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSpec {
    pub source_step: String,
    pub context_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub prompt_template: String,
    /// None falls back to the workflow defaults
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub validator: Option<ValidatorSpec>,
    #[serde(default)]
    pub max_cost_initial: Option<f64>,
    /// None falls back to `max_cost_initial`
    #[serde(default)]
    pub max_cost_retry: Option<f64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub continue_session: bool,
    #[serde(default)]
    pub condition: Option<ConditionSpec>,
    #[serde(default)]
    pub extraction: Option<ExtractionSpec>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl StepSpec {
    /// A step with default settings
    pub fn new(name: impl Into<String>, prompt_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt_template: prompt_template.into(),
            allowed_tools: None,
            disallowed_tools: None,
            validator: None,
            max_cost_initial: None,
            max_cost_retry: None,
            max_retries: DEFAULT_MAX_RETRIES,
            continue_session: false,
            condition: None,
            extraction: None,
        }
    }

    pub fn builder(name: impl Into<String>, prompt_template: impl Into<String>) -> StepSpecBuilder {
        StepSpecBuilder {
            spec: Self::new(name, prompt_template),
        }
    }

    /// Budget for attempts after the first
    pub fn retry_budget(&self) -> Option<f64> {
        self.max_cost_retry.or(self.max_cost_initial)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

pub struct StepSpecBuilder {
    spec: StepSpec,
}

impl StepSpecBuilder {
    pub fn allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn disallowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.disallowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn validator(mut self, validator: ValidatorSpec) -> Self {
        self.spec.validator = Some(validator);
        self
    }

    pub fn max_cost(mut self, budget: f64) -> Self {
        self.spec.max_cost_initial = Some(budget);
        self
    }

    pub fn max_cost_retry(mut self, budget: f64) -> Self {
        self.spec.max_cost_retry = Some(budget);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.spec.max_retries = retries;
        self
    }

    pub fn continue_session(mut self, continue_session: bool) -> Self {
        self.spec.continue_session = continue_session;
        self
    }

    /// Run the step only when the expression holds
    pub fn when(mut self, expression: impl Into<String>) -> Self {
        self.spec.condition = Some(ConditionSpec::Expr(expression.into()));
        self
    }

    pub fn condition(mut self, condition: ConditionSpec) -> Self {
        self.spec.condition = Some(condition);
        self
    }

    pub fn extraction(
        mut self,
        source_step: impl Into<String>,
        context_key: impl Into<String>,
    ) -> Self {
        self.spec.extraction = Some(ExtractionSpec {
            source_step: source_step.into(),
            context_key: context_key.into(),
        });
        self
    }

    pub fn build(self) -> StepSpec {
        self.spec
    }
}
