// SPDX-License-Identifier: MIT

//! Turn-bounded session driver
//!
//! Runs one attempt of a step as a sequence of agent turns in a single
//! session. The budget is a guardrail: once the attempt's cost reaches it the
//! agent is asked to wrap up, and the attempt fails only if it still has not
//! finished after `finalization_cap` such turns.

use crate::adk::agent::{Agent, SessionRef, TurnRequest, TurnResult};
use crate::adk::error::AgentError;
use crate::cadence::config::EngineConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const CONTINUE_DIRECTIVE: &str = "continue";

fn finalize_directive(attempt: u32, cap: u32) -> String {
    format!(
        "You are running out of budget. Finish the task as quickly as possible \
         and give your final answer now. This is finalization attempt {}/{}.",
        attempt, cap
    )
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub finalization_cap: u32,
    /// Internal turn limit per agent invocation
    pub turn_step: Option<u32>,
    pub attempt_timeout: Option<Duration>,
    pub model: String,
}

impl From<&EngineConfig> for DriverConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            finalization_cap: config.finalization_cap,
            turn_step: config.turn_step,
            attempt_timeout: config.attempt_timeout(),
            model: config.model.clone(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Non-terminal phases. `Done` and `Failed` are the `Ok` and `Err` returns of `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Normal,
    ApproachingLimit,
    Finalizing,
}

/// Cooperative cancellation, observed between turns
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub prompt: String,
    /// None issues a single turn
    pub budget: Option<f64>,
    pub session: SessionRef,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Final turn content and session, with `cost` summed over the attempt
    pub result: TurnResult,
    pub turns: u32,
    pub finalization_turns: u32,
}

impl AttemptOutcome {
    pub fn finished(&self) -> bool {
        self.result.done
    }
}

/// Every variant carries the cost spent before the failure
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("cost ${spent:.4} exceeded ${budget:.4} after {finalization_turns} finalization turns")]
    CostExceeded {
        spent: f64,
        budget: f64,
        finalization_turns: u32,
    },

    #[error("{source}")]
    Agent { source: AgentError, spent: f64 },

    #[error("agent returned no session id before finishing")]
    SessionLost { spent: f64 },

    #[error("cancelled")]
    Cancelled { spent: f64 },
}

impl DriverError {
    pub fn spent(&self) -> f64 {
        match self {
            DriverError::CostExceeded { spent, .. }
            | DriverError::Agent { spent, .. }
            | DriverError::SessionLost { spent }
            | DriverError::Cancelled { spent } => *spent,
        }
    }
}

pub struct SessionDriver<'a> {
    agent: &'a dyn Agent,
    config: &'a DriverConfig,
    cancel: &'a CancelHandle,
}

impl<'a> SessionDriver<'a> {
    pub fn new(agent: &'a dyn Agent, config: &'a DriverConfig, cancel: &'a CancelHandle) -> Self {
        Self {
            agent,
            config,
            cancel,
        }
    }

    /// Run one attempt to completion or failure
    pub async fn run(&self, request: &AttemptRequest) -> Result<AttemptOutcome, DriverError> {
        let started = Instant::now();
        let mut phase = DriverPhase::Normal;
        let mut session = request.session.clone();
        let mut spent = 0.0_f64;
        let mut turns = 0u32;
        let mut finalization_turns = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                log::warn!("Attempt cancelled after {} turns", turns);
                return Err(DriverError::Cancelled { spent });
            }

            if phase == DriverPhase::Normal && turns > 0 {
                if let Some(timeout) = self.config.attempt_timeout {
                    if started.elapsed() >= timeout {
                        log::warn!(
                            "Attempt ran for {:?} (limit {:?}), asking the agent to finish",
                            started.elapsed(),
                            timeout
                        );
                        phase = DriverPhase::ApproachingLimit;
                    }
                }
            }

            let prompt = match phase {
                DriverPhase::Normal if turns == 0 => request.prompt.clone(),
                DriverPhase::Normal => CONTINUE_DIRECTIVE.to_string(),
                DriverPhase::ApproachingLimit | DriverPhase::Finalizing => {
                    if finalization_turns >= self.config.finalization_cap {
                        log::error!(
                            "Agent did not finish within {} finalization turns (spent ${:.4})",
                            finalization_turns,
                            spent
                        );
                        return Err(DriverError::CostExceeded {
                            spent,
                            budget: request.budget.unwrap_or(0.0),
                            finalization_turns,
                        });
                    }
                    finalization_turns += 1;
                    phase = DriverPhase::Finalizing;
                    finalize_directive(finalization_turns, self.config.finalization_cap)
                }
            };

            let turn_request = TurnRequest {
                prompt,
                allowed_tools: request.allowed_tools.clone(),
                disallowed_tools: request.disallowed_tools.clone(),
                session: session.clone(),
                model: self.config.model.clone(),
                max_turns: self.config.turn_step,
            };

            let turn = self
                .agent
                .run_turn(&turn_request)
                .await
                .map_err(|source| DriverError::Agent { source, spent })?;

            turns += 1;
            spent += turn.cost.max(0.0);
            log::debug!(
                "Turn {} ({:?}): cost ${:.4}, attempt total ${:.4}, done={}",
                turns,
                phase,
                turn.cost,
                spent,
                turn.done
            );

            let returned_session = turn.session_id.clone();
            if let Some(id) = &returned_session {
                session = SessionRef::Resume(id.clone());
            }

            let budget = match request.budget {
                Some(budget) if !turn.done => budget,
                _ => {
                    if !turn.done {
                        log::warn!("Agent did not finish and no budget allows continuing");
                    }
                    let session_id = returned_session.or_else(|| session.id().map(String::from));
                    return Ok(AttemptOutcome {
                        result: TurnResult {
                            content: turn.content,
                            cost: spent,
                            done: turn.done,
                            session_id,
                        },
                        turns,
                        finalization_turns,
                    });
                }
            };

            if returned_session.is_none() {
                return Err(DriverError::SessionLost { spent });
            }

            if phase == DriverPhase::Normal && spent >= budget {
                log::info!(
                    "Attempt reached its budget (${:.4} >= ${:.4}), entering finalization",
                    spent,
                    budget
                );
                phase = DriverPhase::ApproachingLimit;
            }
        }
    }
}
