// SPDX-License-Identifier: MIT

//! Workflow engine
//!
//! - `executor` - the step scheduler that owns ledger, context and state
//! - `driver` - one cost-bounded attempt against the agent
//! - `retry` - validate-and-retry around the driver
//! - `dynamic` - runtime step generation and extraction steps
//! - `state` - context store and persisted snapshots
//! - `loader` / `builder` - YAML workflow definitions

pub mod builder;
pub mod condition;
pub mod driver;
pub mod dynamic;
pub mod executor;
pub mod ledger;
pub mod loader;
pub mod registry;
pub mod retry;
pub mod state;
pub mod step;
pub mod template;
pub mod types;
pub mod validator;

pub use dynamic::{ExtractionOptions, ForEachGenerator, StepGenerator};
pub use executor::{ExecutionReport, Workflow};
pub use ledger::StepLedger;
pub use state::{Context, FailureReport, RunStatus, Snapshot, StateStore, WorkflowState};
pub use step::{ConditionSpec, ExtractionSpec, StepSpec, ValidatorSpec};
pub use validator::{ValidationResult, Validator};
