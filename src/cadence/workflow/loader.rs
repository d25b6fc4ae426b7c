// SPDX-License-Identifier: MIT

//! Workflow loader - YAML file loading and parsing

use super::types::WorkflowDefinition;
use crate::adk::error::{CadenceError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Loads workflow definitions from YAML files
pub struct WorkflowLoader;

impl WorkflowLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a workflow definition from a YAML file
    pub fn load_workflow<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CadenceError::config(format!(
                "cannot read workflow file {}: {}",
                path.display(),
                e
            ))
        })?;
        let def = Self::parse_yaml(&content)?;
        log::debug!("Loaded workflow '{}' from {}", def.name, path.display());
        Ok(def)
    }

    /// Parse a workflow definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<WorkflowDefinition> {
        let def: WorkflowDefinition = serde_yaml::from_str(content)?;
        Self::check(&def)?;
        Ok(def)
    }

    /// Structural checks that do not need a built workflow
    fn check(def: &WorkflowDefinition) -> Result<()> {
        if def.name.trim().is_empty() {
            return Err(CadenceError::config("workflow name must not be empty"));
        }
        if def.steps.is_empty() {
            return Err(CadenceError::config(format!(
                "workflow '{}' has no steps",
                def.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &def.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(CadenceError::DuplicateStep {
                    name: step.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for WorkflowLoader {
    fn default() -> Self {
        Self::new()
    }
}
