// SPDX-License-Identifier: MIT

//! Agent module - the invocation boundary to the external agent
//!
//! The engine treats the agent as opaque: it sends a prompt with tool grants
//! and a session reference, and gets back text, the cost of the turn and a
//! completion signal.
//! - `ClaudeCliAgent` - drives the `claude` CLI as a subprocess
//! - `ScriptedAgent` - replays canned turns, used for tests and dry runs

mod claude;
mod scripted;

pub use claude::ClaudeCliAgent;
pub use scripted::{ScriptedAgent, ScriptedTurn};

use crate::adk::error::AgentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which conversation a turn belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionRef {
    /// Start a fresh conversation
    #[default]
    New,
    /// Continue the conversation with this id
    Resume(String),
}

impl SessionRef {
    pub fn from_handle(handle: Option<&str>) -> Self {
        match handle {
            Some(id) => SessionRef::Resume(id.to_string()),
            None => SessionRef::New,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            SessionRef::New => None,
            SessionRef::Resume(id) => Some(id),
        }
    }
}

/// A single prompt/response exchange request
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub prompt: String,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub session: SessionRef,
    pub model: String,
    /// Upper bound on internal agent turns for this invocation
    pub max_turns: Option<u32>,
}

/// What the agent hands back for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TurnResult {
    pub content: String,
    pub cost: f64,
    pub done: bool,
    /// Session the turn ran in, used for continuation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TurnResult {
    pub fn new(content: impl Into<String>, cost: f64, done: bool) -> Self {
        Self {
            content: content.into(),
            cost,
            done,
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Core trait for the external reasoning agent
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the agent name
    fn name(&self) -> &str;

    /// Run one turn. Calls are sequential from the engine's point of view.
    async fn run_turn(&self, request: &TurnRequest) -> Result<TurnResult, AgentError>;
}
