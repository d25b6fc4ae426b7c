// SPDX-License-Identifier: MIT

//! Validate-and-retry around the session driver
//!
//! The first attempt runs the step prompt under `max_cost_initial`. When the
//! validator rejects the output, up to `max_retries` further attempts resume
//! the same session with a correction prompt that lists every error.
//! Driver failures are not retried.

use super::driver::{AttemptRequest, DriverError, SessionDriver};
use super::state::Context;
use super::step::StepSpec;
use super::validator::{ValidationResult, Validator};
use crate::adk::agent::{SessionRef, TurnResult};
use crate::adk::error::{AgentError, CadenceError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct StepSuccess {
    pub result: TurnResult,
    pub session_id: Option<String>,
    pub attempts: u32,
    /// Sum over all attempts
    pub total_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    CostExceeded,
    AgentUnavailable,
    Agent,
    SessionLost,
    Cancelled,
    /// The prompt template could not be resolved
    Template,
}

#[derive(Debug, Clone)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
    pub total_cost: f64,
    /// Validator errors of the last attempt, if any
    pub errors: Vec<String>,
    pub session_id: Option<String>,
    budget: f64,
    finalization_turns: u32,
}

impl StepFailure {
    fn from_driver(
        err: DriverError,
        attempts: u32,
        total_cost: f64,
        session_id: Option<String>,
    ) -> Self {
        let (kind, budget, finalization_turns) = match &err {
            DriverError::CostExceeded {
                budget,
                finalization_turns,
                ..
            } => (FailureKind::CostExceeded, *budget, *finalization_turns),
            DriverError::Agent {
                source: AgentError::Unavailable(_),
                ..
            } => (FailureKind::AgentUnavailable, 0.0, 0),
            DriverError::Agent { .. } => (FailureKind::Agent, 0.0, 0),
            DriverError::SessionLost { .. } => (FailureKind::SessionLost, 0.0, 0),
            DriverError::Cancelled { .. } => (FailureKind::Cancelled, 0.0, 0),
        };
        Self {
            kind,
            message: err.to_string(),
            attempts,
            total_cost,
            errors: Vec::new(),
            session_id,
            budget,
            finalization_turns,
        }
    }

    /// The typed error for this failure
    pub fn to_error(&self, step: &str) -> CadenceError {
        let step = step.to_string();
        match self.kind {
            FailureKind::Validation => CadenceError::Validation {
                step,
                attempts: self.attempts,
                errors: self.errors.clone(),
            },
            FailureKind::CostExceeded => CadenceError::CostExceeded {
                step,
                spent: self.total_cost,
                budget: self.budget,
                finalization_turns: self.finalization_turns,
            },
            FailureKind::AgentUnavailable => CadenceError::AgentUnavailable(self.message.clone()),
            FailureKind::Agent => CadenceError::Agent(AgentError::Rejected(self.message.clone())),
            FailureKind::SessionLost => CadenceError::SessionLost { step },
            FailureKind::Cancelled => CadenceError::Cancelled { step },
            FailureKind::Template => CadenceError::config(self.message.clone()),
        }
    }
}

/// Correction prompt sent on retry. Escalates on the final attempt.
pub fn correction_prompt(
    errors: &[String],
    attempt: u32,
    total: u32,
    original: Option<&str>,
) -> String {
    let mut prompt = String::new();
    if let Some(original) = original {
        prompt.push_str(original);
        prompt.push_str("\n\nA previous answer to this task was rejected.\n\n");
    }
    prompt.push_str("The following errors occurred, please fix them:\n");
    for error in errors {
        prompt.push_str("- ");
        prompt.push_str(error);
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nThis is attempt {} of {}.", attempt, total));
    if attempt == total {
        prompt.push_str(
            " This is the final attempt. If these errors are not fixed now the step will fail.",
        );
    }
    prompt
}

pub struct RetryController<'a> {
    driver: SessionDriver<'a>,
}

/// Per-step inputs to the retry loop
pub struct StepRun<'s> {
    pub step: &'s StepSpec,
    pub prompt: &'s str,
    pub session: SessionRef,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub validator: Option<&'s dyn Validator>,
    pub context: &'s Context,
}

impl<'a> RetryController<'a> {
    pub fn new(driver: SessionDriver<'a>) -> Self {
        Self { driver }
    }

    pub async fn run_step(&self, run: StepRun<'_>) -> Result<StepSuccess, StepFailure> {
        let step = run.step;
        let total = step.max_attempts();
        let mut total_cost = 0.0;
        let mut last_session = run.session.id().map(String::from);
        let mut request = AttemptRequest {
            prompt: run.prompt.to_string(),
            budget: step.max_cost_initial,
            session: run.session.clone(),
            allowed_tools: run.allowed_tools.clone(),
            disallowed_tools: run.disallowed_tools.clone(),
        };

        for attempt in 1..=total {
            log::info!(
                "Step '{}' attempt {}/{} (budget: {})",
                step.name,
                attempt,
                total,
                request
                    .budget
                    .map(|b| format!("${:.2}", b))
                    .unwrap_or_else(|| "none".to_string())
            );

            let outcome = match self.driver.run(&request).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    total_cost += err.spent();
                    log::error!("Step '{}' attempt {} failed: {}", step.name, attempt, err);
                    return Err(StepFailure::from_driver(
                        err,
                        attempt,
                        total_cost,
                        last_session,
                    ));
                }
            };

            total_cost += outcome.result.cost;
            if outcome.result.session_id.is_some() {
                last_session = outcome.result.session_id.clone();
            }

            let verdict = match run.validator {
                Some(validator) => validator.validate(&outcome.result, run.context),
                None => ValidationResult::ok(),
            };

            if verdict.valid {
                log::info!(
                    "Step '{}' succeeded on attempt {} (cost ${:.4})",
                    step.name,
                    attempt,
                    total_cost
                );
                return Ok(StepSuccess {
                    result: outcome.result,
                    session_id: last_session,
                    attempts: attempt,
                    total_cost,
                });
            }

            log::warn!(
                "Step '{}' attempt {} failed validation: {}",
                step.name,
                attempt,
                verdict.errors.join("; ")
            );

            if attempt == total {
                return Err(StepFailure {
                    kind: FailureKind::Validation,
                    message: format!(
                        "validation failed after {} attempts: {}",
                        attempt,
                        verdict.errors.join("; ")
                    ),
                    attempts: attempt,
                    total_cost,
                    errors: verdict.errors,
                    session_id: last_session,
                    budget: 0.0,
                    finalization_turns: 0,
                });
            }

            let next = attempt + 1;
            request.budget = step.retry_budget();
            match &last_session {
                Some(id) => {
                    request.session = SessionRef::Resume(id.clone());
                    request.prompt = correction_prompt(&verdict.errors, next, total, None);
                }
                None => {
                    request.session = SessionRef::New;
                    request.prompt =
                        correction_prompt(&verdict.errors, next, total, Some(run.prompt));
                }
            }
        }

        // max_attempts() is at least 1, so the loop always returns
        Err(StepFailure {
            kind: FailureKind::Validation,
            message: "no attempts were made".to_string(),
            attempts: 0,
            total_cost,
            errors: Vec::new(),
            session_id: last_session,
            budget: 0.0,
            finalization_turns: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::agent::{ScriptedAgent, ScriptedTurn};
    use crate::cadence::workflow::driver::{CancelHandle, DriverConfig};
    use crate::cadence::workflow::step::ValidatorSpec;
    use crate::cadence::workflow::validator::NonEmptyValidator;

    async fn run_with(
        agent: &ScriptedAgent,
        step: &StepSpec,
        validator: Option<&dyn Validator>,
    ) -> Result<StepSuccess, StepFailure> {
        let config = DriverConfig::default();
        let cancel = CancelHandle::new();
        let context = Context::new();
        let controller = RetryController::new(SessionDriver::new(agent, &config, &cancel));
        controller
            .run_step(StepRun {
                step,
                prompt: "list the findings",
                session: SessionRef::New,
                allowed_tools: vec![],
                disallowed_tools: vec![],
                validator,
                context: &context,
            })
            .await
    }

    #[test]
    fn test_correction_prompt_escalates() {
        let errors = vec!["missing title".to_string(), "bad severity".to_string()];
        let middle = correction_prompt(&errors, 2, 4, None);
        assert!(middle.starts_with("The following errors occurred, please fix them:\n"));
        assert!(middle.contains("- missing title\n- bad severity\n"));
        assert!(middle.contains("attempt 2 of 4"));
        assert!(!middle.contains("final attempt"));

        let last = correction_prompt(&errors, 4, 4, Some("original task"));
        assert!(last.starts_with("original task\n\n"));
        assert!(last.contains("final attempt"));
    }

    #[tokio::test]
    async fn test_no_validator_accepts_first_result() {
        let agent = ScriptedAgent::new(vec![ScriptedTurn::done("anything", 0.2)]);
        let step = StepSpec::builder("scan", "p").max_cost(1.0).build();
        let success = run_with(&agent, &step, None).await.unwrap();
        assert_eq!(success.attempts, 1);
        assert_eq!(success.session_id.as_deref(), Some("scripted-1"));
    }

    #[tokio::test]
    async fn test_retry_resumes_session_with_correction() {
        let agent = ScriptedAgent::new(vec![
            ScriptedTurn::done("", 0.4),
            ScriptedTurn::done("", 0.3),
            ScriptedTurn::done("fixed", 0.1),
        ]);
        let step = StepSpec::builder("scan", "p")
            .validator(ValidatorSpec::NonEmpty)
            .max_cost(1.0)
            .max_cost_retry(0.25)
            .max_retries(2)
            .build();
        let success = run_with(&agent, &step, Some(&NonEmptyValidator))
            .await
            .unwrap();

        assert_eq!(success.attempts, 3);
        assert!((success.total_cost - 0.8).abs() < 1e-9);
        let requests = agent.requests();
        assert_eq!(requests[1].session, SessionRef::Resume("scripted-1".into()));
        assert!(requests[1].prompt.contains("attempt 2 of 3"));
        assert!(requests[2].prompt.contains("final attempt"));
    }

    #[tokio::test]
    async fn test_validation_exhausted() {
        let agent = ScriptedAgent::from_fn(|_, _| ScriptedTurn::done("wrong", 0.1));
        let reject = |_: &TurnResult, _: &Context| ValidationResult::invalid(["not good"]);
        let step = StepSpec::builder("scan", "p")
            .max_cost(1.0)
            .max_retries(2)
            .build();
        let failure = run_with(&agent, &step, Some(&reject)).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.errors, vec!["not good"]);
        assert_eq!(agent.call_count(), 3);
        assert!(matches!(
            failure.to_error("scan"),
            CadenceError::Validation { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_lost_session_restarts_with_original_prompt() {
        let agent = ScriptedAgent::new(vec![
            ScriptedTurn::done("", 0.1).without_session(),
            ScriptedTurn::done("ok", 0.1),
        ]);
        let step = StepSpec::builder("scan", "p").max_cost(1.0).build();
        run_with(&agent, &step, Some(&NonEmptyValidator))
            .await
            .unwrap();

        let retry = &agent.requests()[1];
        assert_eq!(retry.session, SessionRef::New);
        assert!(retry.prompt.starts_with("list the findings"));
    }

    #[tokio::test]
    async fn test_driver_failure_is_not_retried() {
        let agent = ScriptedAgent::new(vec![
            ScriptedTurn::unavailable("claude not installed"),
            ScriptedTurn::done("never", 0.1),
        ]);
        let step = StepSpec::builder("scan", "p").max_cost(1.0).build();
        let failure = run_with(&agent, &step, Some(&NonEmptyValidator))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::AgentUnavailable);
        assert_eq!(agent.call_count(), 1);
        assert!(matches!(
            failure.to_error("scan"),
            CadenceError::AgentUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_cost_exceeded_carries_spent() {
        let agent = ScriptedAgent::from_fn(|_, _| ScriptedTurn::unfinished("", 0.5));
        let step = StepSpec::builder("scan", "p").max_cost(0.5).build();
        let failure = run_with(&agent, &step, None).await.unwrap_err();

        assert_eq!(failure.kind, FailureKind::CostExceeded);
        assert!((failure.total_cost - 2.0).abs() < 1e-9);
        assert!(matches!(
            failure.to_error("scan"),
            CadenceError::CostExceeded {
                finalization_turns: 3,
                ..
            }
        ));
    }
}
