// SPDX-License-Identifier: MIT

//! Typed error handling for cadence-rs
//!
//! Library code returns these `thiserror` enums. The binary wraps them in
//! `anyhow` at the top level.

use thiserror::Error;

/// Top-level error type for cadence-rs
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Validator kept rejecting the agent output until retries ran out
    #[error("Step '{step}' failed validation after {attempts} attempts: {}", errors.join("; "))]
    Validation {
        step: String,
        attempts: u32,
        errors: Vec<String>,
    },

    /// Finalization turns were exhausted without the agent finishing
    #[error("Step '{step}' exceeded its budget of ${budget:.4} (spent ${spent:.4})")]
    CostExceeded {
        step: String,
        spent: f64,
        budget: f64,
        finalization_turns: u32,
    },

    /// A registration referenced a step that is not in the ledger
    #[error("Step '{name}' not found in workflow")]
    StepNotFound { name: String },

    /// Step names must be unique across the ledger
    #[error("Step '{name}' already exists in workflow")]
    DuplicateStep { name: String },

    /// The ledger only accepts insertions at or after the cursor
    #[error("Cannot insert steps at position {position}, cursor is already at {cursor}")]
    InsertBehindCursor { position: usize, cursor: usize },

    /// A dynamic step generator failed (non-fatal, recorded and logged)
    #[error("Dynamic step generation after '{trigger}' failed: {message}")]
    DynamicGeneration { trigger: String, message: String },

    /// The agent process cannot be invoked at all
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Any other failure at the agent boundary
    #[error("Agent error: {0}")]
    Agent(AgentError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// A named validator or condition has not been registered
    #[error("Unknown {kind} '{name}'")]
    UnknownCapability { kind: &'static str, name: String },

    /// Execution was cancelled at a turn boundary
    #[error("Step '{step}' was cancelled")]
    Cancelled { step: String },

    /// The agent stopped returning a session id mid-attempt
    #[error("Step '{step}' lost its agent session before finishing")]
    SessionLost { step: String },

    /// Configuration errors (bad env values, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl CadenceError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a step not found error
    pub fn step_not_found(name: impl Into<String>) -> Self {
        Self::StepNotFound { name: name.into() }
    }

    /// Create an unknown capability error
    pub fn unknown_capability(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownCapability {
            kind,
            name: name.into(),
        }
    }
}

impl From<AgentError> for CadenceError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Unavailable(message) => Self::AgentUnavailable(message),
            other => Self::Agent(other),
        }
    }
}

/// Errors raised at the agent invocation boundary
#[derive(Debug, Error)]
pub enum AgentError {
    /// Binary missing, not executable, or not authenticated
    #[error("{0}")]
    Unavailable(String),

    /// The agent process exited unsuccessfully
    #[error("agent process exited with code {code:?}: {stderr}")]
    Process { code: Option<i32>, stderr: String },

    /// Output could not be understood
    #[error("invalid agent response: {0}")]
    InvalidResponse(String),

    /// The agent answered with an error result
    #[error("agent rejected the request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Template resolution errors
#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("Unresolved template placeholders: {}", names.join(", "))]
    Unresolved { names: Vec<String> },
}

/// Condition expression errors
#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("Could not parse condition '{0}'")]
    Syntax(String),

    #[error("Could not parse literal '{0}'")]
    Literal(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_agent_maps_to_top_level_variant() {
        let err: CadenceError = AgentError::Unavailable("claude not found".into()).into();
        assert!(matches!(err, CadenceError::AgentUnavailable(ref m) if m == "claude not found"));

        let err: CadenceError = AgentError::Rejected("Prompt is too long".into()).into();
        assert!(matches!(err, CadenceError::Agent(AgentError::Rejected(_))));
    }

    #[test]
    fn test_validation_message_lists_every_error() {
        let err = CadenceError::Validation {
            step: "scan".into(),
            attempts: 3,
            errors: vec!["bad format".into(), "missing field".into()],
        };
        assert_eq!(
            err.to_string(),
            "Step 'scan' failed validation after 3 attempts: bad format; missing field"
        );
    }

    #[test]
    fn test_unresolved_template_message() {
        let err = TemplateError::Unresolved {
            names: vec!["a".into(), "b.c".into()],
        };
        assert_eq!(err.to_string(), "Unresolved template placeholders: a, b.c");
    }
}
