// SPDX-License-Identifier: MIT

//! State management for workflow runs
//!
//! This module provides:
//! - `Context` - the key/value store steps read from and write to
//! - `WorkflowState` - cursor, bookkeeping and run status
//! - `StateStore` - atomic snapshot persistence for resume

mod context;
mod snapshot;

pub use context::Context;
pub use snapshot::{
    ErrorRecord, FailureReport, RunStatus, Snapshot, StateStore, WorkflowState, SNAPSHOT_VERSION,
};
