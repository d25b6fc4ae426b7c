// SPDX-License-Identifier: MIT

//! Claude CLI agent - runs the `claude` binary as a subprocess
//!
//! Each turn is one non-interactive invocation with `--output-format json`.
//! The final `result` object carries the text, the turn cost, the session
//! id and whether the task finished within the allowed internal turns.

use super::{Agent, SessionRef, TurnRequest, TurnResult};
use crate::adk::error::AgentError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Sent to shrink a conversation that no longer fits the context window
const COMPACT_INSTRUCTIONS: &str = "Keep the original task that started this session, \
summarize the current state (completed steps, pending work, files being edited), \
record key findings and decisions, and retain the code, configuration and variables \
needed to carry on without losing track.";

const PROMPT_TOO_LONG: &str = "Prompt is too long";

const INSTALL_URL: &str = "https://github.com/anthropics/claude-code";

const AUTH_FAILURE_MARKERS: &[&str] = &[
    "not logged in",
    "invalid api key",
    "authentication",
    "please run /login",
];

/// Agent backed by the Claude Code command line tool
pub struct ClaudeCliAgent {
    name: String,
    binary: PathBuf,
    execution_dir: PathBuf,
    auto_compact: bool,
    verbose: bool,
}

/// Final message emitted by `claude --output-format json`
#[derive(Debug, Clone, Deserialize)]
struct CliResult {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    subtype: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
    #[serde(default)]
    num_turns: Option<u32>,
}

impl CliResult {
    fn finished(&self) -> bool {
        self.subtype == "success"
    }

    fn hit_turn_limit(&self) -> bool {
        self.subtype == "error_max_turns"
    }

    fn cost(&self) -> f64 {
        self.total_cost_usd.unwrap_or(0.0).max(0.0)
    }

    fn text(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }
}

impl ClaudeCliAgent {
    /// Create an agent for an explicit binary path without checking it exists
    pub fn new(binary: impl Into<PathBuf>, execution_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "claude-cli".to_string(),
            binary: binary.into(),
            execution_dir: execution_dir.into(),
            auto_compact: true,
            verbose: false,
        }
    }

    /// Resolve `binary` on `PATH` and fail early if it is missing
    pub fn locate(binary: &str, execution_dir: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let resolved = which::which(binary).map_err(|e| {
            AgentError::Unavailable(format!(
                "Claude Code CLI '{}' not found ({}). Install it from {}",
                binary, e, INSTALL_URL
            ))
        })?;
        log::debug!("Using Claude CLI at {}", resolved.display());
        Ok(Self::new(resolved, execution_dir))
    }

    /// Compact and replay automatically when the prompt overflows the context
    pub fn with_auto_compact(mut self, enabled: bool) -> Self {
        self.auto_compact = enabled;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn execution_dir(&self) -> &Path {
        &self.execution_dir
    }

    /// Build the CLI argument list for a turn
    pub fn build_args(request: &TurnRequest, verbose: bool) -> Vec<String> {
        let mut args = vec!["--model".to_string(), request.model.clone()];

        if !request.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(request.allowed_tools.join(","));
        }
        if !request.disallowed_tools.is_empty() {
            args.push("--disallowedTools".to_string());
            args.push(request.disallowed_tools.join(","));
        }

        args.push("--output-format".to_string());
        args.push("json".to_string());

        if let Some(max_turns) = request.max_turns {
            args.push("--max-turns".to_string());
            args.push(max_turns.to_string());
        }

        if let SessionRef::Resume(id) = &request.session {
            args.push("--resume".to_string());
            args.push(id.clone());
        }

        if verbose {
            args.push("--verbose".to_string());
        }

        args.push("-p".to_string());
        args.push(request.prompt.clone());
        args
    }

    async fn invoke(&self, request: &TurnRequest) -> Result<CliResult, AgentError> {
        let args = Self::build_args(request, self.verbose);
        log::debug!(
            "Invoking {} (session: {:?}, prompt length: {})",
            self.binary.display(),
            request.session,
            request.prompt.len()
        );

        let output = Command::new(&self.binary)
            .args(&args)
            .current_dir(&self.execution_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    AgentError::Unavailable(format!(
                        "cannot execute {}: {}",
                        self.binary.display(),
                        e
                    ))
                }
                _ => AgentError::Io(e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            // A result object may still be present (e.g. is_error results)
            if let Ok(result) = Self::parse_output(&stdout) {
                return Ok(result);
            }
            if looks_like_auth_failure(&stderr) || looks_like_auth_failure(&stdout) {
                return Err(AgentError::Unavailable(format!(
                    "Claude CLI is not authenticated: {}",
                    stderr.trim()
                )));
            }
            log::error!(
                "Claude CLI exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
            return Err(AgentError::Process {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Self::parse_output(&stdout)
    }

    /// Find the `result` object in CLI output
    fn parse_output(stdout: &str) -> Result<CliResult, AgentError> {
        let trimmed = stdout.trim();
        if let Ok(result) = serde_json::from_str::<CliResult>(trimmed) {
            return Ok(result);
        }

        // Streamed or verbose output: one JSON message per line, result last
        trimmed
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<CliResult>(line.trim()).ok())
            .find(|r| r.kind.as_deref() == Some("result"))
            .ok_or_else(|| {
                let preview: String = trimmed.chars().take(200).collect();
                AgentError::InvalidResponse(format!("no result message in output: {}", preview))
            })
    }

    async fn compact_and_replay(
        &self,
        request: &TurnRequest,
        session_id: &str,
        spent: f64,
    ) -> Result<TurnResult, AgentError> {
        log::info!(
            "Prompt exceeded the context window, compacting session {}",
            session_id
        );

        let mut compact = request.clone();
        compact.prompt = format!("/compact {}", COMPACT_INSTRUCTIONS);
        compact.session = SessionRef::Resume(session_id.to_string());
        let compacted = self.invoke(&compact).await?;

        let mut replay = request.clone();
        let handle = compacted.session_id.as_deref().or(Some(session_id));
        replay.session = SessionRef::from_handle(handle);
        let result = self.invoke(&replay).await?;

        if result.is_error && !result.hit_turn_limit() {
            return Err(AgentError::Rejected(result.text().to_string()));
        }

        Ok(TurnResult {
            content: result.text().to_string(),
            cost: spent + compacted.cost() + result.cost(),
            done: result.finished(),
            session_id: result.session_id.clone(),
        })
    }
}

fn looks_like_auth_failure(output: &str) -> bool {
    let lower = output.to_lowercase();
    AUTH_FAILURE_MARKERS
        .iter()
        .any(|needle| lower.contains(needle))
}

#[async_trait]
impl Agent for ClaudeCliAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_turn(&self, request: &TurnRequest) -> Result<TurnResult, AgentError> {
        let result = self.invoke(request).await?;

        log::info!(
            "Claude turn finished: cost=${:.4}, internal turns={}, subtype={}",
            result.cost(),
            result.num_turns.unwrap_or(0),
            result.subtype
        );

        if result.is_error && !result.hit_turn_limit() {
            if self.auto_compact && result.text() == PROMPT_TOO_LONG {
                if let Some(session_id) = result.session_id.as_deref() {
                    return self
                        .compact_and_replay(request, session_id, result.cost())
                        .await;
                }
            }
            let message = if result.text().is_empty() {
                result.subtype.clone()
            } else {
                result.text().to_string()
            };
            return Err(AgentError::Rejected(message));
        }

        Ok(TurnResult {
            content: result.text().to_string(),
            cost: result.cost(),
            done: result.finished(),
            session_id: result.session_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(session: SessionRef) -> TurnRequest {
        TurnRequest {
            prompt: "audit the contracts".to_string(),
            allowed_tools: vec!["Read".to_string(), "Grep".to_string()],
            disallowed_tools: vec![],
            session,
            model: "sonnet".to_string(),
            max_turns: Some(50),
        }
    }

    #[test]
    fn test_build_args_new_session() {
        let args = ClaudeCliAgent::build_args(&request(SessionRef::New), false);
        assert_eq!(
            args,
            vec![
                "--model",
                "sonnet",
                "--allowedTools",
                "Read,Grep",
                "--output-format",
                "json",
                "--max-turns",
                "50",
                "-p",
                "audit the contracts"
            ]
        );
    }

    #[test]
    fn test_build_args_resume_session() {
        let args = ClaudeCliAgent::build_args(&request(SessionRef::Resume("sess-1".into())), true);
        let resume = args.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(args[resume + 1], "sess-1");
        assert!(args.contains(&"--verbose".to_string()));
        assert_eq!(args.last().unwrap(), "audit the contracts");
        assert!(!args.contains(&"--disallowedTools".to_string()));
    }

    #[test]
    fn test_builder_flags() {
        let agent = ClaudeCliAgent::new("claude", "/tmp/run")
            .with_auto_compact(false)
            .with_verbose(true);
        assert!(agent.verbose);
        assert!(!agent.auto_compact);
        assert_eq!(agent.execution_dir(), Path::new("/tmp/run"));
    }

    #[test]
    fn test_parse_single_result_object() {
        let out = r#"{"type":"result","subtype":"success","is_error":false,"num_turns":4,"result":"done","session_id":"abc","total_cost_usd":0.42}"#;
        let result = ClaudeCliAgent::parse_output(out).unwrap();
        assert!(result.finished());
        assert_eq!(result.text(), "done");
        assert_eq!(result.session_id.as_deref(), Some("abc"));
        assert!((result.cost() - 0.42).abs() < 1e-9);
    }

    #[test]
    fn test_parse_streamed_output_picks_result_line() {
        let out = concat!(
            r#"{"type":"system","subtype":"init","session_id":"abc"}"#,
            "\n",
            r#"{"type":"assistant"}"#,
            "\n",
            r#"{"type":"result","subtype":"error_max_turns","is_error":false,"session_id":"abc","total_cost_usd":1.5}"#,
            "\n"
        );
        let result = ClaudeCliAgent::parse_output(out).unwrap();
        assert!(!result.finished());
        assert!(result.hit_turn_limit());
        assert_eq!(result.text(), "");
    }

    #[test]
    fn test_parse_garbage_is_invalid_response() {
        let err = ClaudeCliAgent::parse_output("not json at all").unwrap_err();
        assert!(matches!(err, AgentError::InvalidResponse(_)));
    }

    #[test]
    fn test_auth_failure_detection() {
        assert!(looks_like_auth_failure("Error: Invalid API key · Please run /login"));
        assert!(!looks_like_auth_failure("segmentation fault"));
    }

    #[test]
    fn test_locate_missing_binary_is_unavailable() {
        let err = ClaudeCliAgent::locate("definitely-not-a-real-claude-binary", ".")
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_run_turn_with_missing_binary_is_unavailable() {
        let agent = ClaudeCliAgent::new("/nonexistent/claude", std::env::temp_dir());
        let err = agent.run_turn(&request(SessionRef::New)).await.unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }
}
