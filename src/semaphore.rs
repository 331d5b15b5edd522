//! Counting semaphores shared by blocking threads and cooperative tasks.
//!
//! All variants share one discipline: an acquire first tries the fast path
//! on the counter (gated on an empty waiter queue in strict-fairness mode),
//! and otherwise parks a fresh token in the FIFO queue and waits on its
//! event. A release prefers handing a unit directly to the oldest live
//! waiter (the counter is never touched for a handoff) and credits the
//! counter only when no waiter is left.
//!
//! # Cancellation and timeouts
//!
//! A cooperative waiter observes its task's cancellation request at the
//! event wait; a blocking waiter can time out. Either way the waiter races
//! the releaser for the token's single claim. If the waiter wins, it
//! unlinks its token and the semaphore is as if it never enqueued. If the
//! handoff wins, a timed-out blocking waiter simply keeps the permit, while
//! a cancelled cooperative waiter re-releases it before propagating the
//! cancellation, so no permit is ever lost.

use crate::config;
use crate::cx::{Cancelled, Cx};
use crate::event::{Event, TaskEvent, ThreadEvent, WaitOutcome};
use crate::wait_queue::{WaitQueue, WaitToken};
use parking_lot::Mutex;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Error returned when a release would push a bounded semaphore past its
/// maximum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowError;

impl fmt::Display for OverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("semaphore released above its maximum value")
    }
}

impl std::error::Error for OverflowError {}

#[derive(Debug)]
struct SemaphoreState {
    value: usize,
    waiters: WaitQueue,
}

/// An unbounded counting semaphore.
///
/// The counter may grow past its initial value through uncontested
/// releases; use [`BoundedSemaphore`] to treat that as a bug.
#[derive(Debug)]
pub struct Semaphore {
    initial_value: usize,
    max_value: Option<usize>,
    state: Mutex<SemaphoreState>,
}

impl Semaphore {
    /// Creates a semaphore with the given number of permits.
    #[must_use]
    pub fn new(initial_value: usize) -> Self {
        Self {
            initial_value,
            max_value: None,
            state: Mutex::new(SemaphoreState {
                value: initial_value,
                waiters: WaitQueue::new(),
            }),
        }
    }

    fn bounded(initial_value: usize, max_value: usize) -> Self {
        assert!(
            initial_value <= max_value,
            "initial_value must be <= max_value"
        );
        Self {
            initial_value,
            max_value: Some(max_value),
            state: Mutex::new(SemaphoreState {
                value: initial_value,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// The number of permits the semaphore was created with.
    #[must_use]
    pub fn initial_value(&self) -> usize {
        self.initial_value
    }

    /// The number of currently available permits.
    #[must_use]
    pub fn value(&self) -> usize {
        self.state.lock().value
    }

    /// The number of queued waiter tokens, including not-yet-reaped
    /// cancellations.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    fn try_acquire_locked(state: &mut SemaphoreState) -> bool {
        if config::perfect_fairness() && !state.waiters.is_empty() {
            return false;
        }
        if state.value == 0 {
            return false;
        }
        state.value -= 1;
        true
    }

    /// Claims one permit without waiting.
    ///
    /// Returns `false` when no permit is available or, in strict-fairness
    /// mode, when waiters are queued ahead of the caller.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        Self::try_acquire_locked(&mut self.state.lock())
    }

    /// Acquires one permit from a blocking caller.
    ///
    /// With `blocking: false` the call returns the fast-path result
    /// immediately. Otherwise the caller parks until a permit is handed
    /// off, or until `timeout` elapses; a timed-out wait returns `false`
    /// unless the handoff won the race at the wire, in which case the
    /// permit is kept and the call returns `true`.
    #[must_use]
    pub fn green_acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        let (token, event) = {
            let mut state = self.state.lock();
            if Self::try_acquire_locked(&mut state) {
                return true;
            }
            if !blocking {
                return false;
            }
            let event = Arc::new(ThreadEvent::new());
            let token = Arc::new(WaitToken::new(Arc::clone(&event) as Arc<dyn Event>));
            state.waiters.enqueue(Arc::clone(&token));
            (token, event)
        };

        if event.wait(timeout) {
            return true;
        }
        // The wait claimed the cancel transition; reap our token.
        self.state.lock().waiters.remove(&token);
        false
    }

    /// Acquires one permit from a cooperative task.
    ///
    /// Returns `Ok(true)` once a permit is held, `Ok(false)` if
    /// `blocking` is `false` and the fast path failed, and
    /// [`Cancelled`] if the task's cancellation request was observed while
    /// waiting. Chain [`AcquireFuture::shielded`] to defer cancellation
    /// observation until after the wait.
    pub fn async_acquire<'a, 'b>(&'a self, cx: &'b Cx, blocking: bool) -> AcquireFuture<'a, 'b> {
        AcquireFuture {
            sem: self,
            cx,
            blocking,
            shield: false,
            waiter: None,
        }
    }

    /// Releases `count` permits.
    ///
    /// Each unit is handed directly to the oldest live waiter when one is
    /// queued, and credited to the counter otherwise.
    pub fn release(&self, count: usize) {
        // Unbounded: overflow is impossible.
        let _ = self.release_inner(count);
    }

    fn release_inner(&self, count: usize) -> Result<(), OverflowError> {
        let mut remaining = count;
        let mut overflowed = false;
        while remaining > 0 {
            let mut to_set: SmallVec<[Arc<WaitToken>; 4]> = SmallVec::new();
            {
                let mut state = self.state.lock();
                while to_set.len() < remaining {
                    match state.waiters.dequeue_head() {
                        Some(token) => to_set.push(token),
                        None => break,
                    }
                }
                let credit = remaining - to_set.len();
                if credit > 0 {
                    match self.max_value {
                        Some(max) if state.value + credit > max => overflowed = true,
                        _ => state.value += credit,
                    }
                }
            }
            remaining = 0;
            // Wake outside the critical section. A set that loses to a
            // concurrent cancellation sends that unit around again.
            for token in &to_set {
                if !token.event().set() {
                    remaining += 1;
                }
            }
        }
        if overflowed {
            Err(OverflowError)
        } else {
            Ok(())
        }
    }

    /// Returns a permit a waiter could not keep (lost cancellation race,
    /// dropped guard). Overflow past a bound drops the unit; the counter
    /// never exceeds `max_value`.
    fn restore(&self, count: usize) {
        let _ = self.release_inner(count);
    }

    /// Acquires one permit and returns a guard releasing it on drop.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the task's cancellation request was
    /// observed while waiting.
    pub async fn async_acquire_permit(&self, cx: &Cx) -> Result<SemaphorePermit<'_>, Cancelled> {
        self.async_acquire(cx, true).await?;
        Ok(SemaphorePermit { sem: self })
    }

    /// Blocking counterpart of [`Semaphore::async_acquire_permit`].
    ///
    /// Returns `None` if `timeout` elapsed before a permit arrived.
    #[must_use]
    pub fn green_acquire_permit(&self, timeout: Option<Duration>) -> Option<SemaphorePermit<'_>> {
        if self.green_acquire(true, timeout) {
            Some(SemaphorePermit { sem: self })
        } else {
            None
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.waiters.is_empty() {
            tracing::warn!(
                waiting = state.waiters.len(),
                "semaphore dropped with parked waiters"
            );
        }
    }
}

impl Serialize for Semaphore {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(
            "Semaphore cannot be serialized: it captures live waiter state",
        ))
    }
}

/// Future returned by [`Semaphore::async_acquire`].
#[must_use = "futures do nothing unless polled"]
pub struct AcquireFuture<'a, 'b> {
    sem: &'a Semaphore,
    cx: &'b Cx,
    blocking: bool,
    shield: bool,
    waiter: Option<(Arc<WaitToken>, Arc<TaskEvent>)>,
}

impl AcquireFuture<'_, '_> {
    /// Ignores cancellation requests for the duration of the wait.
    ///
    /// The caller is still responsible for honoring a pending request once
    /// the permit is held.
    #[must_use]
    pub fn shielded(mut self) -> Self {
        self.shield = true;
        self
    }
}

impl Future for AcquireFuture<'_, '_> {
    type Output = Result<bool, Cancelled>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if this.waiter.is_none() {
            if !this.shield && this.cx.checkpoint().is_err() {
                return Poll::Ready(Err(Cancelled));
            }
            let mut state = this.sem.state.lock();
            if Semaphore::try_acquire_locked(&mut state) {
                return Poll::Ready(Ok(true));
            }
            if !this.blocking {
                return Poll::Ready(Ok(false));
            }
            let event = Arc::new(TaskEvent::new());
            let token = Arc::new(WaitToken::new(Arc::clone(&event) as Arc<dyn Event>));
            state.waiters.enqueue(Arc::clone(&token));
            drop(state);
            this.waiter = Some((token, event));
        }

        let Some((token, event)) = &this.waiter else {
            return Poll::Pending;
        };
        match event.poll_wait(this.cx, this.shield, task_cx.waker()) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(WaitOutcome::Set) => {
                this.waiter = None;
                Poll::Ready(Ok(true))
            }
            Poll::Ready(WaitOutcome::Cancelled { consumed }) => {
                let token = Arc::clone(token);
                this.waiter = None;
                if consumed {
                    // The handoff won the race: give the permit back.
                    this.sem.restore(1);
                } else {
                    this.sem.state.lock().waiters.remove(&token);
                }
                Poll::Ready(Err(Cancelled))
            }
        }
    }
}

impl Drop for AcquireFuture<'_, '_> {
    fn drop(&mut self) {
        let Some((token, event)) = self.waiter.take() else {
            return;
        };
        if event.cancel() {
            self.sem.state.lock().waiters.remove(&token);
        } else if event.is_set() {
            // A handoff landed between the last poll and the drop.
            self.sem.restore(1);
        }
    }
}

impl fmt::Debug for AcquireFuture<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireFuture")
            .field("blocking", &self.blocking)
            .field("shield", &self.shield)
            .field("parked", &self.waiter.is_some())
            .finish()
    }
}

/// A held permit, released back to its semaphore on drop.
#[must_use = "the permit is released as soon as it is dropped"]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    sem: &'a Semaphore,
}

impl SemaphorePermit<'_> {
    /// Forgets the permit without releasing it.
    pub fn forget(self) {
        let _ = std::mem::ManuallyDrop::new(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.sem.restore(1);
    }
}

// ============================================================================
// BoundedSemaphore
// ============================================================================

/// A counting semaphore whose value can never exceed `max_value`.
///
/// A release that would push the value past the bound fails with
/// [`OverflowError`] and leaves the state unchanged, distinguishing a
/// mis-counted release from the uncontested over-release the unbounded
/// [`Semaphore`] allows.
#[derive(Debug)]
pub struct BoundedSemaphore {
    inner: Semaphore,
}

impl BoundedSemaphore {
    /// Creates a bounded semaphore.
    ///
    /// # Panics
    ///
    /// Panics if `initial_value > max_value`.
    #[must_use]
    pub fn new(initial_value: usize, max_value: usize) -> Self {
        Self {
            inner: Semaphore::bounded(initial_value, max_value),
        }
    }

    /// Creates a bounded semaphore that starts full.
    #[must_use]
    pub fn with_max(max_value: usize) -> Self {
        Self::new(max_value, max_value)
    }

    /// The upper bound on the value.
    #[must_use]
    pub fn max_value(&self) -> usize {
        self.inner.max_value.unwrap_or(usize::MAX)
    }

    /// See [`Semaphore::initial_value`].
    #[must_use]
    pub fn initial_value(&self) -> usize {
        self.inner.initial_value()
    }

    /// See [`Semaphore::value`].
    #[must_use]
    pub fn value(&self) -> usize {
        self.inner.value()
    }

    /// See [`Semaphore::waiting`].
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.waiting()
    }

    /// See [`Semaphore::try_acquire`].
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.inner.try_acquire()
    }

    /// See [`Semaphore::green_acquire`].
    #[must_use]
    pub fn green_acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        self.inner.green_acquire(blocking, timeout)
    }

    /// See [`Semaphore::async_acquire`].
    pub fn async_acquire<'a, 'b>(&'a self, cx: &'b Cx, blocking: bool) -> AcquireFuture<'a, 'b> {
        self.inner.async_acquire(cx, blocking)
    }

    /// Releases `count` permits, handing off to waiters first.
    ///
    /// # Errors
    ///
    /// Returns [`OverflowError`] if crediting the remaining units would push
    /// the value past `max_value`; the value is left unchanged. This is the
    /// sole release-time error.
    pub fn release(&self, count: usize) -> Result<(), OverflowError> {
        self.inner.release_inner(count)
    }

    /// See [`Semaphore::async_acquire_permit`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the task's cancellation request was
    /// observed while waiting.
    pub async fn async_acquire_permit(&self, cx: &Cx) -> Result<SemaphorePermit<'_>, Cancelled> {
        self.inner.async_acquire_permit(cx).await
    }

    /// See [`Semaphore::green_acquire_permit`].
    #[must_use]
    pub fn green_acquire_permit(&self, timeout: Option<Duration>) -> Option<SemaphorePermit<'_>> {
        self.inner.green_acquire_permit(timeout)
    }
}

impl Serialize for BoundedSemaphore {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(
            "BoundedSemaphore cannot be serialized: it captures live waiter state",
        ))
    }
}

// ============================================================================
// Binary variants
// ============================================================================

/// A semaphore whose value starts at zero or one.
///
/// `release` is honored unit by unit like the unbounded [`Semaphore`]; use
/// [`BoundedBinarySemaphore`] to make releasing an unlocked semaphore an
/// error.
#[derive(Debug)]
pub struct BinarySemaphore {
    inner: Semaphore,
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySemaphore {
    /// Creates an unlocked binary semaphore (value 1).
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Semaphore::new(1),
        }
    }

    /// Creates a locked binary semaphore (value 0).
    #[must_use]
    pub fn locked() -> Self {
        Self {
            inner: Semaphore::new(0),
        }
    }

    /// Whether no permit is currently available.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.value() == 0
    }

    /// See [`Semaphore::initial_value`].
    #[must_use]
    pub fn initial_value(&self) -> usize {
        self.inner.initial_value()
    }

    /// See [`Semaphore::value`].
    #[must_use]
    pub fn value(&self) -> usize {
        self.inner.value()
    }

    /// See [`Semaphore::waiting`].
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.waiting()
    }

    /// See [`Semaphore::try_acquire`].
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.inner.try_acquire()
    }

    /// See [`Semaphore::green_acquire`].
    #[must_use]
    pub fn green_acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        self.inner.green_acquire(blocking, timeout)
    }

    /// See [`Semaphore::async_acquire`].
    pub fn async_acquire<'a, 'b>(&'a self, cx: &'b Cx, blocking: bool) -> AcquireFuture<'a, 'b> {
        self.inner.async_acquire(cx, blocking)
    }

    /// See [`Semaphore::release`].
    pub fn release(&self, count: usize) {
        self.inner.release(count);
    }

    /// See [`Semaphore::async_acquire_permit`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the task's cancellation request was
    /// observed while waiting.
    pub async fn async_acquire_permit(&self, cx: &Cx) -> Result<SemaphorePermit<'_>, Cancelled> {
        self.inner.async_acquire_permit(cx).await
    }

    /// See [`Semaphore::green_acquire_permit`].
    #[must_use]
    pub fn green_acquire_permit(&self, timeout: Option<Duration>) -> Option<SemaphorePermit<'_>> {
        self.inner.green_acquire_permit(timeout)
    }
}

impl Serialize for BinarySemaphore {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(
            "BinarySemaphore cannot be serialized: it captures live waiter state",
        ))
    }
}

/// A binary semaphore that refuses to be released while unlocked.
#[derive(Debug)]
pub struct BoundedBinarySemaphore {
    inner: Semaphore,
}

impl Default for BoundedBinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedBinarySemaphore {
    /// Creates an unlocked bounded binary semaphore (value 1, bound 1).
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Semaphore::bounded(1, 1),
        }
    }

    /// Creates a locked bounded binary semaphore (value 0, bound 1).
    #[must_use]
    pub fn locked() -> Self {
        Self {
            inner: Semaphore::bounded(0, 1),
        }
    }

    /// Whether no permit is currently available.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.value() == 0
    }

    /// See [`Semaphore::initial_value`].
    #[must_use]
    pub fn initial_value(&self) -> usize {
        self.inner.initial_value()
    }

    /// The upper bound on the value; always 1.
    #[must_use]
    pub fn max_value(&self) -> usize {
        self.inner.max_value.unwrap_or(1)
    }

    /// See [`Semaphore::value`].
    #[must_use]
    pub fn value(&self) -> usize {
        self.inner.value()
    }

    /// See [`Semaphore::waiting`].
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.waiting()
    }

    /// See [`Semaphore::try_acquire`].
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.inner.try_acquire()
    }

    /// See [`Semaphore::green_acquire`].
    #[must_use]
    pub fn green_acquire(&self, blocking: bool, timeout: Option<Duration>) -> bool {
        self.inner.green_acquire(blocking, timeout)
    }

    /// See [`Semaphore::async_acquire`].
    pub fn async_acquire<'a, 'b>(&'a self, cx: &'b Cx, blocking: bool) -> AcquireFuture<'a, 'b> {
        self.inner.async_acquire(cx, blocking)
    }

    /// Releases one unit per `count`, handing off to waiters first.
    ///
    /// # Errors
    ///
    /// Returns [`OverflowError`] when releasing while already unlocked.
    pub fn release(&self, count: usize) -> Result<(), OverflowError> {
        self.inner.release_inner(count)
    }

    /// See [`Semaphore::async_acquire_permit`].
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the task's cancellation request was
    /// observed while waiting.
    pub async fn async_acquire_permit(&self, cx: &Cx) -> Result<SemaphorePermit<'_>, Cancelled> {
        self.inner.async_acquire_permit(cx).await
    }

    /// See [`Semaphore::green_acquire_permit`].
    #[must_use]
    pub fn green_acquire_permit(&self, timeout: Option<Duration>) -> Option<SemaphorePermit<'_>> {
        self.inner.green_acquire_permit(timeout)
    }
}

impl Serialize for BoundedBinarySemaphore {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(
            "BoundedBinarySemaphore cannot be serialized: it captures live waiter state",
        ))
    }
}
