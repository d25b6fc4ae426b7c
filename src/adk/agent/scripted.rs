// SPDX-License-Identifier: MIT

//! Scripted agent - replays canned turns without spawning a process
//!
//! Useful for tests and dry runs of workflow definitions. Every request is
//! recorded so callers can assert on prompts, sessions and tool grants.

use super::{Agent, SessionRef, TurnRequest, TurnResult};
use crate::adk::error::AgentError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One canned response
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    outcome: Outcome,
    keep_session: bool,
}

#[derive(Debug, Clone)]
enum Outcome {
    Reply {
        content: String,
        cost: f64,
        done: bool,
    },
    Unavailable(String),
    Rejected(String),
}

impl ScriptedTurn {
    /// The agent finished its task in this turn
    pub fn done(content: impl Into<String>, cost: f64) -> Self {
        Self::reply(content, cost, true)
    }

    /// The agent ran out of internal turns without finishing
    pub fn unfinished(content: impl Into<String>, cost: f64) -> Self {
        Self::reply(content, cost, false)
    }

    pub fn reply(content: impl Into<String>, cost: f64, done: bool) -> Self {
        Self {
            outcome: Outcome::Reply {
                content: content.into(),
                cost,
                done,
            },
            keep_session: true,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Unavailable(message.into()),
            keep_session: true,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Rejected(message.into()),
            keep_session: true,
        }
    }

    /// Reply without a session id
    pub fn without_session(mut self) -> Self {
        self.keep_session = false;
        self
    }
}

type Responder = Box<dyn Fn(&TurnRequest, usize) -> ScriptedTurn + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<ScriptedTurn>>),
    Responder(Responder),
}

/// Agent that answers from a fixed script or a responder closure
pub struct ScriptedAgent {
    name: String,
    script: Script,
    requests: Mutex<Vec<TurnRequest>>,
    sessions: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedAgent {
    /// Answer turns in order. Requests past the end of the script fail.
    pub fn new(turns: impl IntoIterator<Item = ScriptedTurn>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(turns.into_iter().collect())))
    }

    /// Compute each answer from the request and its zero-based call index
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&TurnRequest, usize) -> ScriptedTurn + Send + Sync + 'static,
    {
        Self::with_script(Script::Responder(Box::new(responder)))
    }

    fn with_script(script: Script) -> Self {
        Self {
            name: "scripted".to_string(),
            script,
            requests: Mutex::new(Vec::new()),
            sessions: AtomicUsize::new(0),
        }
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<TurnRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Turns still queued (always 0 for responder scripts)
    pub fn remaining(&self) -> usize {
        match &self.script {
            Script::Queue(queue) => lock(queue).len(),
            Script::Responder(_) => 0,
        }
    }

    fn next_turn(&self, request: &TurnRequest, index: usize) -> Option<ScriptedTurn> {
        match &self.script {
            Script::Queue(queue) => lock(queue).pop_front(),
            Script::Responder(responder) => Some(responder(request, index)),
        }
    }

    fn session_for(&self, request: &TurnRequest) -> String {
        match &request.session {
            SessionRef::Resume(id) => id.clone(),
            SessionRef::New => {
                let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
                format!("scripted-{}", n)
            }
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_turn(&self, request: &TurnRequest) -> Result<TurnResult, AgentError> {
        let index = {
            let mut requests = lock(&self.requests);
            requests.push(request.clone());
            requests.len() - 1
        };

        let turn = self.next_turn(request, index).ok_or_else(|| {
            AgentError::InvalidResponse(format!("script exhausted at call {}", index + 1))
        })?;

        match turn.outcome {
            Outcome::Reply {
                content,
                cost,
                done,
            } => {
                let session_id = turn.keep_session.then(|| self.session_for(request));
                log::debug!(
                    "Scripted turn {}: cost={:.4}, done={}, session={:?}",
                    index + 1,
                    cost,
                    done,
                    session_id
                );
                Ok(TurnResult {
                    content,
                    cost,
                    done,
                    session_id,
                })
            }
            Outcome::Unavailable(message) => Err(AgentError::Unavailable(message)),
            Outcome::Rejected(message) => Err(AgentError::Rejected(message)),
        }
    }
}
