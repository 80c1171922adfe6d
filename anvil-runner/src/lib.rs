//! Anvil Runner
//!
//! Executes pipeline runs on a single host:
//! - Concurrency gate limiting each pipeline to one active run
//! - Agent provisioning through a container runtime
//! - Sequential, fail-fast stage execution with a run timeout
//! - Post-run archival, fingerprinting and cleanup

pub mod artifacts;
pub mod config;
pub mod context;
pub mod executor;
pub mod gate;
pub mod loader;
pub mod post_run;
pub mod provisioner;
pub mod runner;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use config::RunnerConfig;
pub use gate::{ConcurrencyGate, ConcurrencyToken, GatePolicy};
pub use loader::load_pipeline_file;
pub use runner::PipelineRunner;
pub use runtime::RuntimeKind;
