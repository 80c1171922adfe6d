//! Concurrency gate
//!
//! Limits each pipeline identity to one active run. Locks are keyed by
//! pipeline name, created on first use and never removed, so runs of
//! different pipelines never contend with each other.

use anvil_core::GateError;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// What `acquire` does when the pipeline already has an active run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatePolicy {
    /// Wait until the active run releases its lease
    #[default]
    Queue,
    /// Fail immediately with [`GateError::Blocked`]
    Reject,
}

impl FromStr for GatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queue" => Ok(GatePolicy::Queue),
            "reject" => Ok(GatePolicy::Reject),
            other => Err(format!(
                "unknown gate policy '{}', expected 'queue' or 'reject'",
                other
            )),
        }
    }
}

impl std::fmt::Display for GatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatePolicy::Queue => write!(f, "queue"),
            GatePolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Lease on a pipeline identity
///
/// Dropping the token releases the lease.
#[derive(Debug)]
pub struct ConcurrencyToken {
    pipeline_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ConcurrencyToken {
    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn is_released(&self) -> bool {
        self.guard.is_none()
    }
}

/// Keyed mutual exclusion over pipeline identities
pub struct ConcurrencyGate {
    policy: GatePolicy,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConcurrencyGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the lease for `pipeline_id` according to the gate policy
    pub async fn acquire(&self, pipeline_id: &str) -> Result<ConcurrencyToken, GateError> {
        match self.policy {
            GatePolicy::Reject => self.try_acquire(pipeline_id),
            GatePolicy::Queue => {
                let lock = self.lock_for(pipeline_id);
                debug!("Waiting for concurrency lease on '{}'", pipeline_id);
                let guard = lock.lock_owned().await;
                debug!("Acquired concurrency lease on '{}'", pipeline_id);
                Ok(ConcurrencyToken {
                    pipeline_id: pipeline_id.to_string(),
                    guard: Some(guard),
                })
            }
        }
    }

    /// Acquires the lease without waiting, regardless of policy
    pub fn try_acquire(&self, pipeline_id: &str) -> Result<ConcurrencyToken, GateError> {
        let guard = self
            .lock_for(pipeline_id)
            .try_lock_owned()
            .map_err(|_| GateError::Blocked(pipeline_id.to_string()))?;

        debug!("Acquired concurrency lease on '{}'", pipeline_id);
        Ok(ConcurrencyToken {
            pipeline_id: pipeline_id.to_string(),
            guard: Some(guard),
        })
    }

    /// Releases a lease; releasing an already released token is a no-op
    pub fn release(&self, token: &mut ConcurrencyToken) {
        if token.guard.take().is_some() {
            debug!("Released concurrency lease on '{}'", token.pipeline_id);
        }
    }

    /// Whether a run of `pipeline_id` currently holds the lease
    pub fn is_held(&self, pipeline_id: &str) -> bool {
        self.lock_for(pipeline_id).try_lock().is_err()
    }

    fn lock_for(&self, pipeline_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(pipeline_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(GatePolicy::default())
    }
}
