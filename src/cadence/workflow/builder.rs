// SPDX-License-Identifier: MIT

//! Workflow builder - turns YAML definitions into executable workflows

use super::executor::Workflow;
use super::loader::WorkflowLoader;
use super::types::WorkflowDefinition;
use crate::adk::agent::Agent;
use crate::adk::error::Result;
use crate::cadence::config::EngineConfig;
use std::path::Path;
use std::sync::Arc;

/// Compiles workflow definitions against a base configuration
pub struct Builder {
    loader: WorkflowLoader,
    config: EngineConfig,
}

impl Builder {
    /// `config` is the base the definition's `settings` are applied to
    pub fn new(config: EngineConfig) -> Self {
        Self {
            loader: WorkflowLoader::new(),
            config,
        }
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<WorkflowDefinition> {
        self.loader.load_workflow(path)
    }

    /// Effective configuration for a definition
    pub fn config_for(&self, def: &WorkflowDefinition) -> Result<EngineConfig> {
        let mut config = self.config.clone();
        def.settings.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Build a workflow from a YAML file path
    pub fn build_workflow<P: AsRef<Path>>(
        &self,
        path: P,
        agent: Arc<dyn Agent>,
    ) -> Result<Workflow> {
        let def = self.load(path)?;
        self.build_from_def(&def, agent)
    }

    /// Build a workflow from a parsed definition.
    ///
    /// Steps are added in file order, then extraction steps, then expansion
    /// generators, so an expansion may trigger on an extraction step.
    pub fn build_from_def(
        &self,
        def: &WorkflowDefinition,
        agent: Arc<dyn Agent>,
    ) -> Result<Workflow> {
        let config = self.config_for(def)?;
        let mut workflow = Workflow::new(def.name.clone(), agent, config);

        for (key, value) in &def.context {
            workflow.add_context(key.clone(), value.clone());
        }

        for step in &def.steps {
            workflow.add_step(step.to_step_spec()?)?;
        }

        for extraction in &def.extractions {
            let name = workflow
                .add_extraction_step_with(&extraction.after, extraction.to_options())?;
            log::debug!(
                "Workflow '{}': extraction '{}' after '{}'",
                def.name,
                name,
                extraction.after
            );
        }

        for expansion in &def.expansions {
            workflow.add_dynamic_step_generator(&expansion.after, expansion.to_generator()?)?;
            log::debug!(
                "Workflow '{}': expanding '{}' after '{}'",
                def.name,
                expansion.items,
                expansion.after
            );
        }

        log::info!(
            "Built workflow '{}' with {} steps",
            def.name,
            workflow.ledger().len()
        );
        Ok(workflow)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
