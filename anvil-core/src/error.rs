//! Error types for loading and running pipelines
//!
//! Stage failures are not errors: they are recorded as run outcomes. The
//! types here cover the conditions that stop a run before its stages start.

use thiserror::Error;

/// Errors produced while loading a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Structural violation (missing agent, empty stage list, wrong types)
    #[error("Malformed pipeline definition: {0}")]
    MalformedSpec(String),

    /// Unrecognized configuration key or enumerated value
    #[error("Invalid option '{key}': {message}")]
    InvalidOption {
        /// Dotted path of the offending key (e.g. `post.trigger`)
        key: String,
        message: String,
    },

    /// The definition file could not be read
    #[error("Failed to read pipeline definition {path}: {message}")]
    Unreadable { path: String, message: String },
}

impl LoadError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSpec(message.into())
    }

    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Errors produced while acquiring an execution environment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("Environment unavailable for image {image}: {reason}")]
    EnvironmentUnavailable { image: String, reason: String },
}

/// Errors produced by the concurrency gate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Another run of the same pipeline holds the lease
    #[error("Pipeline '{0}' already has an active run")]
    Blocked(String),
}

/// Errors that abort a run before its post-run handling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The runner was cancelled before this run provisioned an environment
    #[error("Run of pipeline '{0}' cancelled before it started")]
    Cancelled(String),
}
