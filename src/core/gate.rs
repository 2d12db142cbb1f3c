

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use super::error::{KbError, Result};

/// Outcome of a batch job. Failed and empty runs leave committed state as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    Empty,
    Failed,
}


/// Mutual exclusion for batch jobs that rewrite shared state. A second
/// job is rejected rather than queued.
#[derive(Debug, Clone, Default)]
pub struct ExclusiveGate {
    held_by: Arc<Mutex<()>>,
    name: Arc<parking_lot::Mutex<Option<String>>>,
}


#[derive(Debug)]
pub struct GatePermit {
    _guard: OwnedMutexGuard<()>,
    name: Arc<parking_lot::Mutex<Option<String>>>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.name.lock().take();
    }
}

impl ExclusiveGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self, job: &str) -> Result<GatePermit> {
        match Arc::clone(&self.held_by).try_lock_owned() {
            Ok(guard) => {
                *self.name.lock() = Some(job.to_string());
                Ok(GatePermit {
                    _guard: guard,
                    name: Arc::clone(&self.name),
                })
            }
            Err(_) => {
                let running = self
                    .name
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "another batch job".to_string());
                warn!("Rejected batch job {}: {} holds the gate", job, running);
                Err(KbError::ConcurrencyConflict(running))
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.held_by.try_lock().is_err()
    }
}
