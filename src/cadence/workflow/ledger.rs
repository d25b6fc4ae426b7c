// SPDX-License-Identifier: MIT

//! Ordered step ledger

use super::step::StepSpec;
use crate::adk::error::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered list of steps with unique names.
///
/// The only mutation is insertion, and never before the scheduler's cursor,
/// so steps that already ran keep their positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepLedger {
    steps: Vec<StepSpec>,
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, spec: StepSpec) -> Result<()> {
        self.insert_at(self.steps.len(), 0, vec![spec])
    }

    /// Insert directly after the named step
    pub fn insert_after(&mut self, after: &str, spec: StepSpec) -> Result<()> {
        let position = self
            .position(after)
            .ok_or_else(|| CadenceError::step_not_found(after))?;
        self.insert_at(position + 1, 0, vec![spec])
    }

    /// Insert a batch at `position` keeping its order. All-or-nothing: if any
    /// name clashes (with the ledger or within the batch) nothing is inserted.
    pub fn insert_at(
        &mut self,
        position: usize,
        cursor: usize,
        specs: Vec<StepSpec>,
    ) -> Result<()> {
        if position < cursor {
            return Err(CadenceError::InsertBehindCursor { position, cursor });
        }
        let position = position.min(self.steps.len());

        let mut seen: HashSet<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(CadenceError::DuplicateStep {
                    name: spec.name.clone(),
                });
            }
        }

        self.steps.splice(position..position, specs);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&StepSpec> {
        self.steps.get(index)
    }

    pub fn find(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepSpec> {
        self.steps.iter()
    }
}
