// SPDX-License-Identifier: MIT

//! Run state and its persistence
//!
//! The whole run (ledger and state) is written to
//! `<session_dir>/state.json` after every step transition. Writes go
//! through a temp file and a rename, so the file on disk always holds the
//! last fully settled transition.

use super::context::Context;
use crate::adk::error::{CadenceError, Result};
use crate::cadence::workflow::ledger::StepLedger;
use crate::cadence::workflow::retry::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Why a run stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
    /// Cost charged to the step across its attempts
    pub cost: f64,
    pub attempts: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "failure", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed(FailureReport),
}

/// A problem worth keeping in the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub step: Option<String>,
    pub message: String,
    /// Whether the problem stopped the run
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Index of the next ledger entry to run. Never decreases.
    pub cursor: usize,
    pub context: Context,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub cost_per_step: BTreeMap<String, f64>,
    pub session_handles: BTreeMap<String, String>,
    pub status: RunStatus,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            cursor: 0,
            context: Context::new(),
            completed_steps: Vec::new(),
            skipped_steps: Vec::new(),
            cost_per_step: BTreeMap::new(),
            session_handles: BTreeMap::new(),
            status: RunStatus::Pending,
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Add cost to a step's running total
    pub fn charge(&mut self, step: &str, cost: f64) {
        *self.cost_per_step.entry(step.to_string()).or_insert(0.0) += cost.max(0.0);
    }

    pub fn mark_completed(&mut self, step: &str, session_id: Option<&str>) {
        self.completed_steps.push(step.to_string());
        if let Some(id) = session_id {
            self.session_handles
                .insert(step.to_string(), id.to_string());
        }
        self.cursor += 1;
        self.touch();
    }

    pub fn mark_skipped(&mut self, step: &str) {
        self.skipped_steps.push(step.to_string());
        self.cursor += 1;
        self.touch();
    }

    pub fn record_error(&mut self, step: Option<&str>, message: impl Into<String>, fatal: bool) {
        self.errors.push(ErrorRecord {
            timestamp: Utc::now(),
            step: step.map(String::from),
            message: message.into(),
            fatal,
        });
        self.touch();
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
            || self.skipped_steps.iter().any(|s| s == step)
    }

    pub fn total_cost(&self) -> f64 {
        self.cost_per_step.values().sum()
    }

    /// Session of the most recently completed step that has one
    pub fn last_session_handle(&self) -> Option<&str> {
        self.completed_steps
            .iter()
            .rev()
            .find_map(|step| self.session_handles.get(step))
            .map(String::as_str)
    }
}

/// Everything needed to resume a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub workflow: String,
    pub ledger: StepLedger,
    pub state: WorkflowState,
}

impl Snapshot {
    pub fn new(workflow: impl Into<String>, ledger: StepLedger, state: WorkflowState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            workflow: workflow.into(),
            ledger,
            state,
        }
    }
}

/// Session directory storage
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.join("results")
    }

    /// Create the session and results directories
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(self.results_dir())?;
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.state_path().is_file()
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.state_path(), &bytes)?;
        log::debug!(
            "Saved state for '{}' (cursor {}) to {}",
            snapshot.workflow,
            snapshot.state.cursor,
            self.state_path().display()
        );
        Ok(())
    }

    /// Load the snapshot, or None when the session has never been saved
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let path = self.state_path();
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(CadenceError::config(format!(
                "{} was written by a newer version (snapshot v{}, supported v{})",
                path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            )));
        }
        log::info!(
            "Loaded state for '{}' from {} ({} completed, {} skipped)",
            snapshot.workflow,
            path.display(),
            snapshot.state.completed_steps.len(),
            snapshot.state.skipped_steps.len()
        );
        Ok(Some(snapshot))
    }

    /// Remove the state file only
    pub fn delete(&self) -> Result<()> {
        let path = self.state_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Remove the whole session directory
    pub fn remove_all(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
            log::info!("Removed session directory {}", self.dir.display());
        }
        Ok(())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
    let written = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
