//! Execution context for a single run
//!
//! Collects the run log: stage transitions, command output, warnings.
//! The log is drained into the run report when the run finishes.

use anvil_core::domain::log::{LogEntry, LogLevel};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Per-run state shared by the executor and the post-run handler
pub struct RunContext {
    /// Run identifier, also the workspace directory name
    pub run_id: Uuid,

    /// Pipeline being executed
    pub pipeline: String,

    log_buffer: Mutex<Vec<LogEntry>>,
}

impl RunContext {
    /// Creates a new run context
    pub fn new(run_id: Uuid, pipeline: impl Into<String>) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    /// Adds a log entry to the buffer
    pub fn add_log(&self, entry: LogEntry) {
        self.log_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.add_log(LogEntry::now(LogLevel::Debug, message));
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.add_log(LogEntry::now(LogLevel::Info, message));
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.add_log(LogEntry::now(LogLevel::Warning, message));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.add_log(LogEntry::now(LogLevel::Error, message));
    }

    /// Logs multi-line command output, one entry per non-empty line
    pub fn log_output(&self, level: LogLevel, output: &str) {
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            self.add_log(LogEntry::now(level, line));
        }
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        self.log_buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_logs() {
        let ctx = RunContext::new(Uuid::new_v4(), "hoard");
        ctx.log_info("Starting stage: Build");
        ctx.log_error("boom");

        let drained = ctx.drain_logs();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].level, LogLevel::Info);
        assert_eq!(drained[1].message, "boom");

        // Buffer should be empty after drain
        assert!(ctx.drain_logs().is_empty());
    }

    #[test]
    fn test_log_output_splits_lines() {
        let ctx = RunContext::new(Uuid::new_v4(), "hoard");
        ctx.log_output(LogLevel::Info, "Compiling hoard\n\n   Finished release\n");

        let logs = ctx.drain_logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].message, "   Finished release");
    }
}
