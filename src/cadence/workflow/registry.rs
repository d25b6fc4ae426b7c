// SPDX-License-Identifier: MIT

//! Capability registry
//!
//! Steps refer to validators and conditions by descriptor. Built-in
//! descriptors resolve directly; `Named` ones look up what was registered.

use super::condition::{self, Condition};
use super::state::Context;
use super::step::{ConditionSpec, StepSpec, ValidatorSpec};
use super::validator::{NonEmptyValidator, SchemaValidator, Validator};
use crate::adk::error::{CadenceError, Result};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Registry {
    validators: HashMap<String, Arc<dyn Validator>>,
    conditions: HashMap<String, Arc<dyn Condition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_validator(&mut self, name: impl Into<String>, validator: Arc<dyn Validator>) {
        let name = name.into();
        if self.validators.insert(name.clone(), validator).is_some() {
            log::warn!(
                "Validator '{}' was registered twice, keeping the latest",
                name
            );
        }
    }

    pub fn register_condition(&mut self, name: impl Into<String>, condition: Arc<dyn Condition>) {
        let name = name.into();
        if self.conditions.insert(name.clone(), condition).is_some() {
            log::warn!(
                "Condition '{}' was registered twice, keeping the latest",
                name
            );
        }
    }

    pub fn resolve_validator(&self, spec: &ValidatorSpec) -> Result<Arc<dyn Validator>> {
        match spec {
            ValidatorSpec::NonEmpty => Ok(Arc::new(NonEmptyValidator)),
            ValidatorSpec::Schema(schema) => Ok(Arc::new(SchemaValidator::new(schema.clone())?)),
            ValidatorSpec::Named(name) => self
                .validators
                .get(name)
                .cloned()
                .ok_or_else(|| CadenceError::unknown_capability("validator", name)),
        }
    }

    pub fn evaluate_condition(&self, spec: &ConditionSpec, context: &Context) -> Result<bool> {
        match spec {
            ConditionSpec::Expr(expr) => Ok(condition::parse(expr)?.evaluate(context)),
            ConditionSpec::Named(name) => self
                .conditions
                .get(name)
                .map(|c| c.evaluate(context))
                .ok_or_else(|| CadenceError::unknown_capability("condition", name)),
        }
    }

    /// Verify every capability a step refers to can be resolved
    pub fn check_step(&self, step: &StepSpec) -> Result<()> {
        if let Some(validator) = &step.validator {
            self.resolve_validator(validator)?;
        }
        match &step.condition {
            Some(ConditionSpec::Expr(expr)) => {
                condition::parse(expr)?;
            }
            Some(ConditionSpec::Named(name)) if !self.conditions.contains_key(name) => {
                return Err(CadenceError::unknown_capability("condition", name));
            }
            _ => {}
        }
        Ok(())
    }
}
