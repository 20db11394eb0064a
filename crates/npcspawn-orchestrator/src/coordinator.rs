//! Ownership of the single active batch.
//!
//! Exactly one batch is current. Submitting a new one cancels the previous
//! batch's token before the new batch starts; nothing waits for the old units
//! to drain.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lifecycle of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Pending,
    Running,
    Completed,
    /// A newer batch was submitted while this one was running
    Superseded,
    /// Stopped through [`BatchCoordinator::cancel_active`]
    Cancelled,
}

impl BatchState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Superseded | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Superseded => "superseded",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct BatchShared {
    correlation_id: String,
    token: CancellationToken,
    state: Mutex<BatchState>,
}

/// Shared view of one submitted batch
#[derive(Debug, Clone)]
pub struct BatchHandle(Arc<BatchShared>);

impl BatchHandle {
    fn new(correlation_id: String) -> Self {
        Self(Arc::new(BatchShared {
            correlation_id,
            token: CancellationToken::new(),
            state: Mutex::new(BatchState::Pending),
        }))
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.0.correlation_id
    }

    /// Token every unit of this batch observes
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.0.token.clone()
    }

    #[must_use]
    pub fn state(&self) -> BatchState {
        *self.lock_state()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.token.is_cancelled()
    }

    fn same_batch(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Move to `next` unless already terminal; returns whether it moved
    fn transition(&self, next: BatchState) -> bool {
        let mut state = self.lock_state();
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, BatchState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the one optional active batch.
#[derive(Debug, Default)]
pub struct BatchCoordinator {
    next_id: AtomicU64,
    active: Mutex<Option<BatchHandle>>,
}

impl BatchCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running batch, superseding any running predecessor.
    pub fn submit(&self) -> BatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = BatchHandle::new(format!("batch-{id}"));

        let mut active = self.lock_active();
        if let Some(previous) = active.take() {
            if previous.transition(BatchState::Superseded) {
                previous.0.token.cancel();
                info!(
                    batch = previous.correlation_id(),
                    superseded_by = handle.correlation_id(),
                    "Batch superseded"
                );
            }
        }
        handle.transition(BatchState::Running);
        *active = Some(handle.clone());
        handle
    }

    /// Mark `handle` finished and release the active slot if it still holds it.
    ///
    /// Returns the batch's final state; a superseded or cancelled batch keeps
    /// that state.
    pub fn complete(&self, handle: &BatchHandle) -> BatchState {
        handle.transition(BatchState::Completed);
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.same_batch(handle)) {
            *active = None;
        }
        handle.state()
    }

    /// Cancel the running batch, if any. Returns whether anything was cancelled.
    pub fn cancel_active(&self) -> bool {
        let mut active = self.lock_active();
        let Some(handle) = active.take() else {
            return false;
        };
        if !handle.transition(BatchState::Cancelled) {
            return false;
        }
        handle.0.token.cancel();
        info!(batch = handle.correlation_id(), "Batch cancelled");
        true
    }

    /// Currently running batch
    #[must_use]
    pub fn active(&self) -> Option<BatchHandle> {
        self.lock_active().clone()
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<BatchHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
