// SPDX-License-Identifier: MIT

//! Agent development kit
//!
//! The invocation boundary to the external reasoning agent and the error
//! types shared by the rest of the crate.

pub mod agent;
pub mod error;
