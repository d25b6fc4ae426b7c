// SPDX-License-Identifier: MIT

//! cadence-rs - resumable multi-step workflows over an external coding agent
//!
//! A workflow is an ordered ledger of steps. Each step renders a prompt from
//! the shared context, drives the agent under a cost budget, validates the
//! answer with corrective retries, and persists the run state before moving
//! on so an interrupted run resumes exactly where it stopped.

pub mod adk;
pub mod cadence;

pub use adk::agent::{
    Agent, ClaudeCliAgent, ScriptedAgent, ScriptedTurn, SessionRef, TurnRequest, TurnResult,
};
pub use adk::error::{CadenceError, Result};
pub use cadence::config::EngineConfig;
pub use cadence::workflow::{
    Context, ExecutionReport, ExtractionOptions, StepSpec, ValidationResult, Workflow,
};
