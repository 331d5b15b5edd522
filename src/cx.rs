//! The capability context for cooperative tasks.
//!
//! `Cx` is the token a runtime hands each task it drives. It carries the
//! task's [`Identity`] and a shared cancellation flag; the primitives
//! observe the flag at their suspension points and propagate a pending
//! request as [`Cancelled`].
//!
//! `Cx` is cheaply clonable; clones share cancellation state, so a request
//! set through any clone is visible to all of them.

use crate::identity::{ExecutorKind, Identity};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Error returned when an operation observed a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Capability context of a cooperative task.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

#[derive(Debug)]
struct CxInner {
    identity: Identity,
    cancel_requested: AtomicBool,
}

impl Cx {
    /// Creates a context for the task with the given id.
    ///
    /// Runtimes construct one context per task; the id must be unique among
    /// live tasks and stable for the task's lifetime.
    #[must_use]
    pub fn new(task_id: u64) -> Self {
        Self {
            inner: Arc::new(CxInner {
                identity: Identity::new(ExecutorKind::Task, task_id),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a context with a fresh process-unique task id.
    ///
    /// Suitable for tests and for standalone use outside a runtime.
    #[must_use]
    pub fn for_testing() -> Self {
        static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
        Self::new(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The identity of the task this context belongs to.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.inner.identity
    }

    /// Returns true if cancellation has been requested for this task.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// Sets or clears the cancellation request.
    pub fn set_cancel_requested(&self, requested: bool) {
        self.inner.cancel_requested.store(requested, Ordering::Release);
    }

    /// Surfaces a pending cancellation request as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancel_requested() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
