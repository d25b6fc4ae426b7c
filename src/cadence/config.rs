// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Defaults, overridden by `CADENCE_*` environment variables (a `.env` file
//! is loaded by the binary), overridden again by the `settings` block of a
//! workflow definition.

use crate::adk::error::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime knobs shared by every step of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Agent executable name or path
    pub claude_bin: String,
    pub model: String,
    /// Finish-efficiently turns allowed once a step's budget is reached
    pub finalization_cap: u32,
    /// `--max-turns` passed to each agent invocation
    pub turn_step: Option<u32>,
    pub attempt_timeout_secs: Option<u64>,
    /// Parent directory of per-run session directories
    pub session_root: PathBuf,
    /// Tool grants for steps that do not set their own. None uses the defaults.
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Vec<String>,
    /// Remove the session directory after a successful run
    pub cleanup_on_success: bool,
    pub auto_compact: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claude_bin: "claude".to_string(),
            model: "sonnet".to_string(),
            finalization_cap: 3,
            turn_step: Some(50),
            attempt_timeout_secs: None,
            session_root: PathBuf::from(".cadence/sessions"),
            allowed_tools: None,
            disallowed_tools: Vec::new(),
            cleanup_on_success: false,
            auto_compact: true,
        }
    }
}

/// Partial configuration as written in a workflow file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    #[serde(default)]
    pub claude_bin: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub finalization_cap: Option<u32>,
    #[serde(default)]
    pub turn_step: Option<u32>,
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,
    #[serde(default)]
    pub session_root: Option<PathBuf>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub cleanup_on_success: Option<bool>,
    #[serde(default)]
    pub auto_compact: Option<bool>,
}

impl EngineSettings {
    pub fn apply(&self, config: &mut EngineConfig) {
        if let Some(v) = &self.claude_bin {
            config.claude_bin = v.clone();
        }
        if let Some(v) = &self.model {
            config.model = v.clone();
        }
        if let Some(v) = self.finalization_cap {
            config.finalization_cap = v;
        }
        if let Some(v) = self.turn_step {
            config.turn_step = Some(v);
        }
        if let Some(v) = self.attempt_timeout_secs {
            config.attempt_timeout_secs = Some(v);
        }
        if let Some(v) = &self.session_root {
            config.session_root = v.clone();
        }
        if let Some(v) = &self.allowed_tools {
            config.allowed_tools = Some(v.clone());
        }
        if let Some(v) = &self.disallowed_tools {
            config.disallowed_tools = v.clone();
        }
        if let Some(v) = self.cleanup_on_success {
            config.cleanup_on_success = v;
        }
        if let Some(v) = self.auto_compact {
            config.auto_compact = v;
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `CADENCE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bin) = lookup("CADENCE_CLAUDE_BIN") {
            config.claude_bin = bin;
        }
        if let Some(model) = lookup("CADENCE_MODEL") {
            config.model = model;
        }
        if let Some(cap) = lookup("CADENCE_FINALIZATION_CAP") {
            config.finalization_cap = parse_number("CADENCE_FINALIZATION_CAP", &cap)?;
        }
        if let Some(step) = lookup("CADENCE_TURN_STEP") {
            // 0 disables the per-invocation turn limit
            let step: u32 = parse_number("CADENCE_TURN_STEP", &step)?;
            config.turn_step = (step > 0).then_some(step);
        }
        if let Some(secs) = lookup("CADENCE_ATTEMPT_TIMEOUT_SECS") {
            config.attempt_timeout_secs =
                Some(parse_number("CADENCE_ATTEMPT_TIMEOUT_SECS", &secs)?);
        }
        if let Some(root) = lookup("CADENCE_SESSION_ROOT") {
            config.session_root = PathBuf::from(root);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.finalization_cap == 0 {
            return Err(CadenceError::config("finalization_cap must be at least 1"));
        }
        if self.model.trim().is_empty() {
            return Err(CadenceError::config("model must not be empty"));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs.map(Duration::from_secs)
    }

    /// Fresh directory path `<session_root>/<timestamp>_<suffix>`
    pub fn new_session_dir(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.session_root.join(format!("{}_{}", stamp, &suffix[..6]))
    }

    /// Tool grants for steps without their own list
    pub fn allowed_tools_for(&self, working_dir: &Path) -> Vec<String> {
        self.allowed_tools
            .clone()
            .unwrap_or_else(|| default_allowed_tools(working_dir))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CadenceError::config(format!("{} must be a number, got '{}'", key, value)))
}

/// `path` made absolute against the current directory. Symlinks are not resolved.
pub fn absolute_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Read-only exploration everywhere, writes only inside the working directory.
/// Grants use the agent's `//` prefix for absolute paths.
pub fn default_allowed_tools(working_dir: &Path) -> Vec<String> {
    let wd = absolute_path(working_dir);
    let mut tools: Vec<String> = ["Read", "Grep", "Glob", "LS", "Task", "TodoWrite"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    for tool in ["Write", "Edit", "MultiEdit"] {
        tools.push(format!("{}(/{}/**)", tool, wd.display()));
    }
    for cmd in [
        "cd:*", "pwd", "ls:*", "find:*", "tree:*", "diff:*", "mkdir:*", "mv:*", "cp:*",
    ] {
        tools.push(format!("Bash({})", cmd));
    }
    tools
}
