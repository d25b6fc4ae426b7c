// SPDX-License-Identifier: MIT

//! Step scheduler
//!
//! `Workflow` owns the ledger, the run state and the session directory. It
//! runs steps strictly in ledger order: condition, template, driver and
//! retry, then context updates, dynamic insertion and a persisted cursor
//! advance. A step is fully settled on disk before the next one starts.

use super::condition::Condition;
use super::driver::{CancelHandle, DriverConfig, SessionDriver};
use super::dynamic::{extraction_step, ExtractionOptions, StepGenerator};
use super::ledger::StepLedger;
use super::registry::Registry;
use super::retry::{FailureKind, RetryController, StepFailure, StepRun, StepSuccess};
use super::state::{Context, FailureReport, RunStatus, Snapshot, StateStore, WorkflowState};
use super::step::StepSpec;
use super::template::TemplateResolver;
use super::validator::{extract_json, SchemaValidator, Validator};
use crate::adk::agent::{Agent, SessionRef};
use crate::adk::error::{CadenceError, Result};
use crate::cadence::config::{absolute_path, EngineConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of `Workflow::execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub workflow: String,
    pub session_dir: PathBuf,
    pub context: Context,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub cost_per_step: BTreeMap<String, f64>,
    pub total_cost: f64,
    /// Set when a step failed and the run stopped
    pub failure: Option<FailureReport>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct Workflow {
    name: String,
    agent: Arc<dyn Agent>,
    config: EngineConfig,
    /// Steps as added by the caller. Fresh runs start from a copy of it.
    static_ledger: StepLedger,
    ledger: StepLedger,
    state: WorkflowState,
    registry: Registry,
    generators: HashMap<String, Arc<dyn StepGenerator>>,
    base_context: Context,
    store: StateStore,
    execution_dir: PathBuf,
    cancel: CancelHandle,
}

impl Workflow {
    /// New workflow with a fresh session directory under `config.session_root`.
    /// Session and execution directories are always held as absolute paths.
    pub fn new(name: impl Into<String>, agent: Arc<dyn Agent>, config: EngineConfig) -> Self {
        let session_dir = absolute_path(&config.new_session_dir());
        Self {
            name: name.into(),
            agent,
            config,
            static_ledger: StepLedger::new(),
            ledger: StepLedger::new(),
            state: WorkflowState::new(),
            registry: Registry::new(),
            generators: HashMap::new(),
            base_context: Context::new(),
            store: StateStore::new(session_dir),
            execution_dir: absolute_path(Path::new(".")),
            cancel: CancelHandle::new(),
        }
    }

    /// Use an existing session directory, e.g. to resume a previous run
    pub fn with_session_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.store = StateStore::new(absolute_path(dir.as_ref()));
        self
    }

    /// Directory the agent runs in
    pub fn with_execution_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.execution_dir = absolute_path(dir.as_ref());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    /// Session directory. Also the agent's writable working directory.
    pub fn session_dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn execution_dir(&self) -> &Path {
        &self.execution_dir
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.name.clone(), self.ledger.clone(), self.state.clone())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn add_step(&mut self, spec: StepSpec) -> Result<()> {
        log::debug!("Adding step '{}'", spec.name);
        self.static_ledger.push(spec)?;
        self.ledger = self.static_ledger.clone();
        Ok(())
    }

    pub fn add_step_after(&mut self, after: &str, spec: StepSpec) -> Result<()> {
        log::debug!("Adding step '{}' after '{}'", spec.name, after);
        self.static_ledger.insert_after(after, spec)?;
        self.ledger = self.static_ledger.clone();
        Ok(())
    }

    /// Run `generator` once after `trigger` succeeds
    pub fn add_dynamic_step_generator(
        &mut self,
        trigger: &str,
        generator: impl StepGenerator + 'static,
    ) -> Result<()> {
        if !self.static_ledger.contains(trigger) {
            return Err(CadenceError::step_not_found(trigger));
        }
        if self
            .generators
            .insert(trigger.to_string(), Arc::new(generator))
            .is_some()
        {
            log::warn!("Replacing the dynamic step generator for '{}'", trigger);
        }
        Ok(())
    }

    /// Insert a schema extraction step after `after`. Returns the new step's name.
    pub fn add_extraction_step(
        &mut self,
        after: &str,
        schema: Value,
        context_key: Option<&str>,
    ) -> Result<String> {
        let mut options = ExtractionOptions::new(schema);
        if let Some(key) = context_key {
            options = options.context_key(key);
        }
        self.add_extraction_step_with(after, options)
    }

    pub fn add_extraction_step_with(
        &mut self,
        after: &str,
        options: ExtractionOptions,
    ) -> Result<String> {
        SchemaValidator::new(options.schema.clone())?;
        let step = extraction_step(after, &options);
        let name = step.name.clone();
        self.static_ledger.insert_after(after, step)?;
        self.ledger = self.static_ledger.clone();
        log::debug!("Added extraction step '{}' after '{}'", name, after);
        Ok(name)
    }

    /// Extraction step whose schema is derived from `T`
    pub fn add_extraction_step_for<T: JsonSchema>(
        &mut self,
        after: &str,
        context_key: Option<&str>,
    ) -> Result<String> {
        let mut options = ExtractionOptions::for_type::<T>()?;
        if let Some(key) = context_key {
            options = options.context_key(key);
        }
        self.add_extraction_step_with(after, options)
    }

    pub fn register_validator(
        &mut self,
        name: impl Into<String>,
        validator: impl Validator + 'static,
    ) {
        self.registry.register_validator(name, Arc::new(validator));
    }

    pub fn register_condition(
        &mut self,
        name: impl Into<String>,
        condition: impl Condition + 'static,
    ) {
        self.registry.register_condition(name, Arc::new(condition));
    }

    /// Seed a context entry for fresh runs
    pub fn add_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.base_context.insert(key, value);
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.snapshot())
    }

    fn report(&self) -> ExecutionReport {
        ExecutionReport {
            workflow: self.name.clone(),
            session_dir: self.store.dir().to_path_buf(),
            context: self.state.context.clone(),
            completed_steps: self.state.completed_steps.clone(),
            skipped_steps: self.state.skipped_steps.clone(),
            cost_per_step: self.state.cost_per_step.clone(),
            total_cost: self.state.total_cost(),
            failure: match &self.state.status {
                RunStatus::Failed(report) => Some(report.clone()),
                _ => None,
            },
        }
    }

    /// Run the workflow. With `resume`, continue from the saved snapshot in
    /// the session directory if there is one.
    pub async fn execute(
        &mut self,
        initial_context: Context,
        resume: bool,
    ) -> Result<ExecutionReport> {
        let restored = if resume { self.store.load()? } else { None };

        match restored {
            Some(snapshot) => {
                if snapshot.workflow != self.name {
                    log::warn!(
                        "Snapshot belongs to workflow '{}', resuming it as '{}'",
                        snapshot.workflow,
                        self.name
                    );
                }
                self.ledger = snapshot.ledger;
                self.state = snapshot.state;
                for (key, value) in initial_context.iter() {
                    if !self.state.context.contains_key(key) {
                        self.state.context.insert(key.clone(), value.clone());
                    }
                }
                if self.state.status == RunStatus::Completed {
                    log::info!(
                        "Workflow '{}' already completed, nothing to resume",
                        self.name
                    );
                    return Ok(self.report());
                }
                log::info!(
                    "Resuming workflow '{}' at step {}/{}",
                    self.name,
                    self.state.cursor + 1,
                    self.ledger.len()
                );
            }
            None => {
                if resume {
                    log::warn!(
                        "No saved state in {}, starting a fresh run",
                        self.store.dir().display()
                    );
                }
                self.ledger = self.static_ledger.clone();
                self.state = WorkflowState::new();
                self.state.context = self.base_context.clone();
                self.state.context.extend(initial_context);
            }
        }

        for step in self.ledger.iter().skip(self.state.cursor) {
            self.registry.check_step(step)?;
        }

        self.store.prepare()?;
        self.state.status = RunStatus::Running;
        self.state.touch();
        self.persist()?;

        log::info!(
            "Running workflow '{}' ({} steps) in {}",
            self.name,
            self.ledger.len(),
            self.store.dir().display()
        );

        let driver_config = DriverConfig::from(&self.config);
        let working_dir = self.store.dir().to_path_buf();
        let results_dir = self.store.results_dir();

        while self.state.cursor < self.ledger.len() {
            let index = self.state.cursor;
            let step = match self.ledger.get(index) {
                Some(step) => step.clone(),
                None => break,
            };

            if let Some(condition) = &step.condition {
                if !self.registry.evaluate_condition(condition, &self.state.context)? {
                    log::info!("Skipping step '{}': condition not met", step.name);
                    self.state.mark_skipped(&step.name);
                    self.persist()?;
                    continue;
                }
            }

            log::info!(
                "Step {}/{}: '{}'",
                index + 1,
                self.ledger.len(),
                step.name
            );

            let resolved = TemplateResolver::with_dirs(
                &self.state.context,
                &working_dir,
                &self.execution_dir,
                &results_dir,
            )
            .resolve(&step.prompt_template);
            let prompt = match resolved {
                Ok(prompt) => prompt,
                Err(err) => {
                    let error = CadenceError::from(err);
                    log::error!("Step '{}' failed: {}", step.name, error);
                    let report = FailureReport {
                        step: step.name.clone(),
                        kind: FailureKind::Template,
                        message: error.to_string(),
                        cost: 0.0,
                        attempts: 0,
                        errors: Vec::new(),
                    };
                    return self.stop(report);
                }
            };

            let session = if step.continue_session {
                SessionRef::from_handle(self.state.last_session_handle())
            } else {
                SessionRef::New
            };
            let validator = step
                .validator
                .as_ref()
                .map(|spec| self.registry.resolve_validator(spec))
                .transpose()?;

            let outcome = {
                let driver = SessionDriver::new(self.agent.as_ref(), &driver_config, &self.cancel);
                RetryController::new(driver)
                    .run_step(StepRun {
                        step: &step,
                        prompt: &prompt,
                        session,
                        allowed_tools: step
                            .allowed_tools
                            .clone()
                            .unwrap_or_else(|| self.config.allowed_tools_for(&working_dir)),
                        disallowed_tools: step
                            .disallowed_tools
                            .clone()
                            .unwrap_or_else(|| self.config.disallowed_tools.clone()),
                        validator: validator.as_deref(),
                        context: &self.state.context,
                    })
                    .await
            };

            match outcome {
                Ok(success) => self.complete(&step, success)?,
                Err(failure) => return self.fail(&step, failure),
            }
        }

        self.state.status = RunStatus::Completed;
        self.state.touch();
        self.persist()?;
        log::info!(
            "Workflow '{}' completed: {} steps run, {} skipped, total cost ${:.4}",
            self.name,
            self.state.completed_steps.len(),
            self.state.skipped_steps.len(),
            self.state.total_cost()
        );

        let report = self.report();
        if self.config.cleanup_on_success {
            self.store.remove_all()?;
        }
        Ok(report)
    }

    /// Settle a successful step: context, extraction payload, dynamic
    /// insertion, bookkeeping, then one persisted transition.
    fn complete(&mut self, step: &StepSpec, success: StepSuccess) -> Result<()> {
        let name = step.name.as_str();
        self.state
            .context
            .insert(format!("{}_output", name), success.result.content.clone());

        if let Some(extraction) = &step.extraction {
            match extract_json(&success.result.content) {
                Ok(payload) => {
                    log::debug!("Stored extracted data under '{}'", extraction.context_key);
                    self.state
                        .context
                        .insert(extraction.context_key.clone(), payload);
                }
                Err(err) => {
                    log::error!(
                        "Extraction step '{}' output could not be parsed: {}",
                        name,
                        err
                    );
                    self.state.record_error(Some(name), err, false);
                }
            }
        }

        self.state.charge(name, success.total_cost);

        if let Some(generator) = self.generators.get(name).cloned() {
            self.insert_generated(name, generator.as_ref(), &success);
        }

        self.state
            .mark_completed(name, success.session_id.as_deref());
        self.persist()
    }

    fn insert_generated(
        &mut self,
        trigger: &str,
        generator: &dyn StepGenerator,
        success: &StepSuccess,
    ) {
        let generated = generator
            .generate(&success.result, &self.state.context)
            .map_err(|e| e.to_string())
            .and_then(|specs| {
                for spec in &specs {
                    self.registry.check_step(spec).map_err(|e| e.to_string())?;
                }
                let cursor = self.state.cursor;
                let count = specs.len();
                self.ledger
                    .insert_at(cursor + 1, cursor, specs)
                    .map(|_| count)
                    .map_err(|e| e.to_string())
            });

        match generated {
            Ok(count) => log::info!("Step '{}' generated {} new steps", trigger, count),
            Err(message) => {
                let error = CadenceError::DynamicGeneration {
                    trigger: trigger.to_string(),
                    message,
                };
                log::error!("{}", error);
                self.state
                    .record_error(Some(trigger), error.to_string(), false);
            }
        }
    }

    fn fail(&mut self, step: &StepSpec, failure: StepFailure) -> Result<ExecutionReport> {
        self.state.charge(&step.name, failure.total_cost);
        let error = failure.to_error(&step.name);
        log::error!("{}", error);
        let report = FailureReport {
            step: step.name.clone(),
            kind: failure.kind,
            message: error.to_string(),
            cost: failure.total_cost,
            attempts: failure.attempts,
            errors: failure.errors,
        };
        self.stop(report)
    }

    fn stop(&mut self, report: FailureReport) -> Result<ExecutionReport> {
        self.state
            .record_error(Some(&report.step), report.message.clone(), true);
        self.state.status = RunStatus::Failed(report);
        self.persist()?;
        Ok(self.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::agent::{ScriptedAgent, ScriptedTurn, TurnResult};
    use crate::cadence::workflow::step::ValidatorSpec;
    use crate::cadence::workflow::validator::ValidationResult;
    use serde_json::json;
    use std::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    type Generated = std::result::Result<Vec<StepSpec>, Box<dyn Error + Send + Sync>>;

    fn workflow(agent: Arc<ScriptedAgent>, dir: &TempDir) -> Workflow {
        Workflow::new("test", agent, EngineConfig::default())
            .with_session_dir(dir.path().join("session"))
            .with_execution_dir(dir.path())
    }

    #[tokio::test]
    async fn test_outputs_and_costs_are_recorded() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![
            ScriptedTurn::done("found 2 issues", 0.5),
            ScriptedTurn::done("report written", 0.25),
        ]));
        let mut wf = workflow(agent.clone(), &dir);
        wf.add_step(
            StepSpec::builder("scan", "Scan {{ target }}")
                .max_cost(1.0)
                .build(),
        )
        .unwrap();
        wf.add_step(StepSpec::builder("report", "Report on: {{ scan_output }}").build())
            .unwrap();

        let mut context = Context::new();
        context.insert("target", "src/");
        let report = wf.execute(context, false).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.completed_steps, vec!["scan", "report"]);
        assert_eq!(
            report.context.get("report_output"),
            Some(&json!("report written"))
        );
        assert!((report.total_cost - 0.75).abs() < 1e-9);

        let prompts: Vec<String> = agent.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["Scan src/", "Report on: found 2 issues"]);
        assert_eq!(wf.state().status, RunStatus::Completed);
        assert!(StateStore::new(wf.session_dir()).exists());
    }

    #[tokio::test]
    async fn test_continue_session_reuses_last_handle() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![
            ScriptedTurn::done("a", 0.1),
            ScriptedTurn::done("b", 0.1),
            ScriptedTurn::done("c", 0.1),
        ]));
        let mut wf = workflow(agent.clone(), &dir);
        wf.add_step(StepSpec::new("first", "one")).unwrap();
        wf.add_step(
            StepSpec::builder("second", "two")
                .continue_session(true)
                .build(),
        )
        .unwrap();
        wf.add_step(StepSpec::new("third", "three")).unwrap();
        wf.execute(Context::new(), false).await.unwrap();

        let sessions: Vec<SessionRef> = agent.requests().into_iter().map(|r| r.session).collect();
        assert_eq!(
            sessions,
            vec![
                SessionRef::New,
                SessionRef::Resume("scripted-1".into()),
                SessionRef::New
            ]
        );
    }

    #[tokio::test]
    async fn test_default_tool_grants_apply() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![
            ScriptedTurn::done("a", 0.1),
            ScriptedTurn::done("b", 0.1),
        ]));
        let mut wf = workflow(agent.clone(), &dir);
        wf.add_step(StepSpec::new("defaults", "x")).unwrap();
        wf.add_step(
            StepSpec::builder("custom", "y")
                .allowed_tools(["Read"])
                .build(),
        )
        .unwrap();
        wf.execute(Context::new(), false).await.unwrap();

        let requests = agent.requests();
        assert!(requests[0].allowed_tools.contains(&"Grep".to_string()));
        assert_eq!(requests[1].allowed_tools, vec!["Read"]);
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_fails_without_calling_agent() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![]));
        let mut wf = workflow(agent.clone(), &dir);
        wf.add_step(StepSpec::new("scan", "Scan {{ missing }}"))
            .unwrap();

        let report = wf.execute(Context::new(), false).await.unwrap();
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::Template);
        assert!(failure.message.contains("missing"));
        assert_eq!(agent.call_count(), 0);
        assert_eq!(wf.state().errors.len(), 1);
        assert!(wf.state().errors[0].fatal);
    }

    #[tokio::test]
    async fn test_unknown_named_validator_is_rejected_before_running() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![ScriptedTurn::done("x", 0.1)]));
        let mut wf = workflow(agent.clone(), &dir);
        wf.add_step(StepSpec::new("ok", "fine")).unwrap();
        wf.add_step(
            StepSpec::builder("checked", "y")
                .validator(ValidatorSpec::Named("strict".into()))
                .build(),
        )
        .unwrap();

        let err = wf.execute(Context::new(), false).await.unwrap_err();
        assert!(matches!(
            err,
            CadenceError::UnknownCapability {
                kind: "validator",
                ..
            }
        ));
        assert_eq!(agent.call_count(), 0);
    }

    #[tokio::test]
    async fn test_named_validator_triggers_retry() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![
            ScriptedTurn::done("y", 0.1),
            ScriptedTurn::done("x", 0.1),
        ]));
        let mut wf = workflow(agent.clone(), &dir);
        wf.add_step(
            StepSpec::builder("checked", "answer")
                .validator(ValidatorSpec::Named("strict".into()))
                .build(),
        )
        .unwrap();
        wf.register_validator("strict", |result: &TurnResult, _: &Context| {
            if result.content == "x" {
                ValidationResult::ok()
            } else {
                ValidationResult::invalid(["expected x"])
            }
        });

        let report = wf.execute(Context::new(), false).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(agent.call_count(), 2);
        assert!(agent.requests()[1].prompt.contains("expected x"));
        assert!((report.cost_per_step["checked"] - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_generator_registration_requires_trigger() {
        let dir = TempDir::new().unwrap();
        let mut wf = workflow(Arc::new(ScriptedAgent::new(vec![])), &dir);
        let generator = |_: &TurnResult, _: &Context| -> Generated { Ok(vec![]) };
        let err = wf
            .add_dynamic_step_generator("ghost", generator)
            .unwrap_err();
        assert!(matches!(err, CadenceError::StepNotFound { .. }));
    }

    #[tokio::test]
    async fn test_generator_error_is_recorded_and_run_continues() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![
            ScriptedTurn::done("a", 0.1),
            ScriptedTurn::done("b", 0.1),
        ]));
        let mut wf = workflow(agent, &dir);
        wf.add_step(StepSpec::new("plan", "plan it")).unwrap();
        wf.add_step(StepSpec::new("after", "next")).unwrap();
        wf.add_dynamic_step_generator("plan", |_: &TurnResult, _: &Context| -> Generated {
            Err("could not parse plan".into())
        })
        .unwrap();

        let report = wf.execute(Context::new(), false).await.unwrap();
        assert!(report.succeeded());
        assert_eq!(report.completed_steps, vec!["plan", "after"]);
        let errors = &wf.state().errors;
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].fatal);
        assert!(errors[0].message.contains("could not parse plan"));
    }

    #[tokio::test]
    async fn test_duplicate_generated_names_reject_whole_batch() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::from_fn(|_, _| ScriptedTurn::done("ok", 0.1)));
        let mut wf = workflow(agent, &dir);
        wf.add_step(StepSpec::new("plan", "plan it")).unwrap();
        wf.add_step(StepSpec::new("after", "next")).unwrap();
        wf.add_dynamic_step_generator("plan", |_: &TurnResult, _: &Context| -> Generated {
            Ok(vec![StepSpec::new("new_one", "x"), StepSpec::new("after", "dup")])
        })
        .unwrap();

        let report = wf.execute(Context::new(), false).await.unwrap();
        assert_eq!(report.completed_steps, vec!["plan", "after"]);
        assert_eq!(wf.ledger().len(), 2);
        assert_eq!(wf.state().errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_on_success_removes_session_dir() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new(vec![ScriptedTurn::done("a", 0.1)]));
        let config = EngineConfig {
            cleanup_on_success: true,
            ..EngineConfig::default()
        };
        let mut wf = Workflow::new("test", agent, config).with_session_dir(dir.path().join("s"));
        wf.add_step(StepSpec::new("only", "x")).unwrap();

        let report = wf.execute(Context::new(), false).await.unwrap();
        assert!(report.succeeded());
        assert!(!dir.path().join("s").exists());
    }

    #[tokio::test]
    async fn test_fresh_rerun_starts_from_static_steps() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::from_fn(|_, _| ScriptedTurn::done("ok", 0.1)));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut wf = workflow(agent.clone(), &dir);
        wf.add_step(StepSpec::new("plan", "plan it")).unwrap();
        wf.add_step(StepSpec::new("after", "next")).unwrap();
        let counter = calls.clone();
        wf.add_dynamic_step_generator("plan", move |_: &TurnResult, _: &Context| -> Generated {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![StepSpec::new("extra", "more")])
        })
        .unwrap();

        let first = wf.execute(Context::new(), false).await.unwrap();
        let second = wf.execute(Context::new(), false).await.unwrap();

        assert_eq!(first.completed_steps, vec!["plan", "extra", "after"]);
        assert!(second.succeeded());
        assert_eq!(second.completed_steps, first.completed_steps);
        assert!(wf.state().errors.is_empty());
        assert_eq!(wf.ledger().len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(agent.call_count(), 6);
    }

    #[tokio::test]
    async fn test_relative_session_root_is_made_absolute() {
        let name = format!("sessions-{}", uuid::Uuid::new_v4().simple());
        let root = PathBuf::from("target").join(name);
        let config = EngineConfig {
            session_root: root.clone(),
            cleanup_on_success: true,
            ..EngineConfig::default()
        };
        let agent = Arc::new(ScriptedAgent::new(vec![ScriptedTurn::done("ok", 0.1)]));
        let mut wf = Workflow::new("test", agent.clone(), config);
        wf.add_step(StepSpec::new("write", "write to {{ working_dir }}"))
            .unwrap();

        let session_dir = wf.session_dir().to_path_buf();
        assert!(session_dir.is_absolute());
        assert!(session_dir.starts_with(std::env::current_dir().unwrap().join(&root)));
        assert!(wf.execution_dir().is_absolute());

        let report = wf.execute(Context::new(), false).await.unwrap();
        assert!(report.succeeded());
        let request = &agent.requests()[0];
        let expected = format!("write to {}", session_dir.display());
        assert_eq!(request.prompt, expected);
        let grant = format!("Write(/{}/**)", session_dir.display());
        assert!(request.allowed_tools.contains(&grant));
        assert!(!session_dir.exists());

        let _ = std::fs::remove_dir_all(&root);
    }
}
