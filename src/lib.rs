//! Synchronization primitives shared by blocking threads and cooperative tasks.
//!
//! A thread that blocks on an OS primitive and a cooperative task that
//! suspends on a runtime wakeup object can contend for, acquire, and release
//! the same lock or semaphore. Both worlds meet in a single fair FIFO wait
//! queue whose elements couple a thread parker and a task waker through the
//! one-shot [`Event`](event::Event) latch.
//!
//! # Primitives
//!
//! - [`Semaphore`]: unbounded counting semaphore
//! - [`BoundedSemaphore`]: counting semaphore with a hard upper bound
//! - [`BinarySemaphore`] / [`BoundedBinarySemaphore`]: value domain {0, 1}
//! - [`Lock`]: non-reentrant, owner-tracked mutual exclusion
//! - [`RLock`]: reentrant over [`Lock`] by owner identity
//!
//! # Two worlds, one queue
//!
//! Every primitive exposes an `async_*` surface for cooperative tasks
//! (driven by a [`Cx`] capability context carrying identity and
//! cancellation) and a `green_*` surface for blocking callers (optionally
//! timed). A releaser does not care which world a waiter came from: it
//! dequeues the oldest live token and sets its event, handing the permit or
//! the lock ownership directly to the waiter.
//!
//! # Fairness
//!
//! Handoff is strictly FIFO among uncancelled waiters. In the default
//! strict-fairness mode the acquire fast path also refuses to run while any
//! waiter is queued, so a late arriver cannot barge past parked waiters; see
//! [`config::perfect_fairness`].

pub mod config;
pub mod cx;
pub mod event;
pub mod identity;
pub mod lock;
pub mod semaphore;
pub mod test_logging;
pub mod wait_queue;

pub use cx::{Cancelled, Cx};
pub use event::{Event, TaskEvent, ThreadEvent, WaitOutcome};
pub use identity::{
    current_green_identity, current_thread_identity, ExecutorKind, Identity,
};
pub use lock::{Lock, LockGuard, RLock, RLockGuard};
pub use semaphore::{
    BinarySemaphore, BoundedBinarySemaphore, BoundedSemaphore, OverflowError, Semaphore,
    SemaphorePermit,
};
pub use wait_queue::WaitToken;
#[allow(deprecated)]
pub use lock::{BLock, PLock};
