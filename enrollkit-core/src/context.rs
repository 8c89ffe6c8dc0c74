//! Cancellation and deadline context threaded through collaborator calls.
//!
//! The engine owns no timeout of its own: it hands the same [`RunContext`]
//! to every collaborator call, and a collaborator that notices cancellation
//! or an expired deadline fails promptly with
//! [`CollaboratorError::Cancelled`], which the engine then propagates like
//! any other stage failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CollaboratorError;

/// Context for one signup run.
///
/// Cheap to clone; clones share the same cancellation flag.
#[derive(Clone, Debug)]
pub struct RunContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RunContext {
    /// A context with no deadline that can only end via its cancel handle.
    #[must_use]
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The absolute deadline, if one is set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` when no deadline is set.
    ///
    /// Returns `Some(Duration::ZERO)` once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns a handle that cancels this context (and all its clones).
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Whether the context has been cancelled via a handle.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fails if the context is cancelled or its deadline has passed.
    ///
    /// Collaborators call this at their entry points so a dead context
    /// surfaces before any further work or I/O.
    ///
    /// # Errors
    /// Returns [`CollaboratorError::Cancelled`] when the context is no
    /// longer live.
    pub fn ensure_active(&self) -> Result<(), CollaboratorError> {
        if self.is_cancelled() {
            return Err(CollaboratorError::cancelled("run cancelled"));
        }
        if self.remaining() == Some(Duration::ZERO) {
            return Err(CollaboratorError::cancelled("deadline exceeded"));
        }
        Ok(())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::background()
    }
}

/// Cancels the [`RunContext`] it was created from.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Cancels the context. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
