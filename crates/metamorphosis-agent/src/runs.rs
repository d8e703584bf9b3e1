use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::types::ThreadId;

/// Runs currently in flight, at most one per thread.
#[derive(Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashMap<ThreadId, CancellationToken>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `thread_id` for a new run. Fails with `ThreadBusy` if another
    /// run holds it. The claim is released when the guard is dropped.
    pub fn register(&self, thread_id: &ThreadId) -> Result<RunGuard> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| MetamorphosisError::ThreadBusy(thread_id.to_string()))?;
        if active.contains_key(thread_id) {
            return Err(MetamorphosisError::ThreadBusy(thread_id.to_string()));
        }
        let token = CancellationToken::new();
        active.insert(thread_id.clone(), token.clone());
        debug!(thread_id = %thread_id, "Run registered");

        Ok(RunGuard {
            thread_id: thread_id.clone(),
            token,
            active: self.active.clone(),
        })
    }

    /// Request cancellation of the run on `thread_id`. Returns false if none is in flight.
    pub fn cancel(&self, thread_id: &ThreadId) -> bool {
        let token = self
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(thread_id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, thread_id: &ThreadId) -> bool {
        self.active
            .lock()
            .map(|active| active.contains_key(thread_id))
            .unwrap_or(false)
    }
}

/// Exclusive claim on a thread for the duration of one run.
pub struct RunGuard {
    thread_id: ThreadId,
    token: CancellationToken,
    active: Arc<Mutex<HashMap<ThreadId, CancellationToken>>>,
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.thread_id);
        }
    }
}
