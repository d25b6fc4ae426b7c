// SPDX-License-Identifier: MIT

//! Workflow engine and its configuration

pub mod config;
pub mod workflow;
