//! Anvil Core
//!
//! Core types and abstractions for the Anvil pipeline executor.
//!
//! This crate contains:
//! - Domain types: pipelines, run status, run reports, log entries
//! - Errors: load, provision and concurrency-gate failures
//! - Definition validation shared by every definition format

pub mod definition;
pub mod domain;
pub mod error;

pub use definition::{parse_definition, parse_json_definition};
pub use error::{GateError, LoadError, ProvisionError, RunError};
