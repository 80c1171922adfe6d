//! Core domain types
//!
//! Shared between the definition loaders (which produce pipelines) and the
//! runner (which executes them and produces reports).

pub mod log;
pub mod pipeline;
pub mod run;
