//! Owner-tracked locks shared by blocking threads and cooperative tasks.
//!
//! [`Lock`] is a non-reentrant mutual-exclusion primitive that records which
//! executor holds it: re-acquiring it from the owner is a programming bug
//! reported as [`AcquireError::Recursion`], and only the owner may release.
//! [`RLock`] layers a recursion counter on the same machinery, so the owner
//! may re-acquire freely and must release as many times as it acquired.
//!
//! Release always prefers a direct handoff: the releaser dequeues the oldest
//! live waiter, assigns ownership to it *before* setting its event, and the
//! waiter wakes already owning the lock. Only when no waiter is left does
//! the lock return to the unlocked state.

use crate::cx::{Cancelled, Cx};
use crate::event::{Event, TaskEvent, ThreadEvent, WaitOutcome};
use crate::identity::{current_green_identity, Identity};
use crate::wait_queue::{WaitQueue, WaitToken};
use parking_lot::Mutex;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Error returned when acquiring a lock fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// Cancelled while waiting for the lock.
    Cancelled,
    /// The calling executor already holds this non-reentrant lock.
    Recursion,
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("lock acquire cancelled"),
            Self::Recursion => f.write_str("the current executor is already holding this lock"),
        }
    }
}

impl std::error::Error for AcquireError {}

impl From<Cancelled> for AcquireError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Error returned when releasing a lock fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseError {
    /// The lock is not held at all.
    Unlocked,
    /// The calling executor is not the owner.
    NotOwner,
    /// More recursion levels released than acquired.
    Underflow,
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlocked => f.write_str("release of an unlocked lock"),
            Self::NotOwner => f.write_str("the current executor is not holding this lock"),
            Self::Underflow => f.write_str("lock released more times than it was acquired"),
        }
    }
}

impl std::error::Error for ReleaseError {}

#[derive(Debug)]
struct LockState {
    unlocked: bool,
    owner: Option<Identity>,
    releasing: bool,
    count: usize,
    waiters: WaitQueue,
}

/// A non-reentrant, owner-tracked lock.
#[derive(Debug)]
pub struct Lock {
    state: Mutex<LockState>,
}

impl Lock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState {
                unlocked: true,
                owner: None,
                releasing: false,
                count: 0,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Whether the lock is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.state.lock().unlocked
    }

    /// The identity of the current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<Identity> {
        self.state.lock().owner
    }

    /// The number of queued waiter tokens, including not-yet-reaped
    /// cancellations.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Whether the calling task owns the lock.
    #[must_use]
    pub fn async_owned(&self, cx: &Cx) -> bool {
        self.state.lock().owner == Some(cx.identity())
    }

    /// Whether the calling green executor owns the lock.
    #[must_use]
    pub fn green_owned(&self) -> bool {
        self.state.lock().owner == Some(current_green_identity())
    }

    /// Acquires the lock from a cooperative task.
    ///
    /// Returns `Ok(true)` once the lock is held, `Ok(false)` if `blocking`
    /// is `false` and the lock was taken, [`AcquireError::Recursion`] if the
    /// task already owns it, and [`AcquireError::Cancelled`] if the task's
    /// cancellation request was observed while waiting.
    pub fn async_acquire<'a, 'b>(&'a self, cx: &'b Cx, blocking: bool) -> LockAcquireFuture<'a, 'b> {
        LockAcquireFuture {
            lock: self,
            cx,
            identity: cx.identity(),
            count: 1,
            reentrant: false,
            blocking,
            shield: false,
            waiter: None,
        }
    }

    /// Acquires the lock from a blocking caller.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Recursion`] if the calling executor already
    /// owns the lock.
    pub fn green_acquire(
        &self,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<bool, AcquireError> {
        self.green_acquire_as(current_green_identity(), 1, false, blocking, timeout)
    }

    fn green_acquire_as(
        &self,
        identity: Identity,
        count: usize,
        reentrant: bool,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<bool, AcquireError> {
        let (token, event) = {
            let mut state = self.state.lock();
            if state.owner == Some(identity) {
                if reentrant {
                    state.count += count;
                    return Ok(true);
                }
                return Err(AcquireError::Recursion);
            }
            if state.unlocked {
                state.unlocked = false;
                state.owner = Some(identity);
                state.count = count;
                return Ok(true);
            }
            if !blocking {
                return Ok(false);
            }
            let event = Arc::new(ThreadEvent::new());
            let token = Arc::new(WaitToken::with_owner(
                Arc::clone(&event) as Arc<dyn Event>,
                identity,
                count,
            ));
            state.waiters.enqueue(Arc::clone(&token));
            (token, event)
        };

        if event.wait(timeout) {
            // Ownership was assigned by the releaser before the wake.
            return Ok(true);
        }
        self.state.lock().waiters.remove(&token);
        Ok(false)
    }

    /// Releases the lock from a cooperative task.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::Unlocked`] when the lock is not held and
    /// [`ReleaseError::NotOwner`] when the caller does not own it.
    pub fn async_release(&self, cx: &Cx) -> Result<(), ReleaseError> {
        self.release_as(cx.identity())
    }

    /// Releases the lock from a blocking caller.
    ///
    /// # Errors
    ///
    /// As for [`Lock::async_release`].
    pub fn green_release(&self) -> Result<(), ReleaseError> {
        self.release_as(current_green_identity())
    }

    fn release_as(&self, identity: Identity) -> Result<(), ReleaseError> {
        {
            let state = self.state.lock();
            match state.owner {
                None => return Err(ReleaseError::Unlocked),
                Some(owner) if owner != identity => return Err(ReleaseError::NotOwner),
                Some(_) => {}
            }
        }
        self.handoff_release();
        Ok(())
    }

    /// Hands the lock to the oldest live waiter, or unlocks it.
    ///
    /// Ownership is assigned before the waiter's event is set, so the waiter
    /// wakes already owning the lock. A set that loses to a concurrent
    /// cancellation moves on to the next waiter.
    fn handoff_release(&self) {
        loop {
            let token = {
                let mut state = self.state.lock();
                match state.waiters.dequeue_head() {
                    Some(token) => {
                        state.releasing = true;
                        state.owner = token.owner();
                        state.count = token.count();
                        Some(token)
                    }
                    None => {
                        state.releasing = false;
                        state.owner = None;
                        state.count = 0;
                        state.unlocked = true;
                        None
                    }
                }
            };
            let Some(token) = token else { return };
            if token.event().set() {
                self.state.lock().releasing = false;
                return;
            }
        }
    }

    /// Acquires the lock and returns a guard releasing it on drop.
    ///
    /// # Errors
    ///
    /// As for [`Lock::async_acquire`].
    pub async fn async_lock(&self, cx: &Cx) -> Result<LockGuard<'_>, AcquireError> {
        self.async_acquire(cx, true).await?;
        Ok(LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Blocking counterpart of [`Lock::async_lock`].
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Recursion`] if the calling executor already
    /// owns the lock.
    pub fn green_lock(&self) -> Result<LockGuard<'_>, AcquireError> {
        self.green_acquire(true, None)?;
        Ok(LockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    // ------------------------------------------------------------------
    // Condition-variable support
    // ------------------------------------------------------------------

    /// Enqueues a caller-built token in this lock's wait queue.
    ///
    /// The caller then waits on the token's own event; a later release
    /// hands the lock to the token in FIFO turn. The token must carry the
    /// identity that is to own the lock after the handoff.
    pub fn park(&self, token: Arc<WaitToken>) {
        self.state.lock().waiters.enqueue(token);
    }

    /// Hands the lock directly to one parked token, bypassing FIFO order.
    ///
    /// Unlinks the token, assigns ownership from it, and sets its event.
    /// Returns whether the event was claimed by this call; on `false` the
    /// token's waiter had already abandoned the wait and the caller still
    /// holds the lock.
    pub fn unpark(&self, token: &Arc<WaitToken>) -> bool {
        {
            let mut state = self.state.lock();
            state.waiters.remove(token);
            if let Some(owner) = token.owner() {
                state.unlocked = false;
                state.owner = Some(owner);
                state.count = token.count().max(1);
            }
        }
        token.event().set()
    }

    /// Reasserts ownership after a wake that bypassed the acquire path.
    ///
    /// Used by waiters migrated into the queue with [`Lock::park`] once
    /// their event fires.
    pub fn after_park(&self, identity: Identity, count: usize) {
        let mut state = self.state.lock();
        state.unlocked = false;
        state.owner = Some(identity);
        state.count = count.max(1);
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.unlocked || !state.waiters.is_empty() {
            tracing::warn!(
                owner = ?state.owner,
                waiting = state.waiters.len(),
                "lock dropped while held"
            );
        }
    }
}

impl Serialize for Lock {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(
            "Lock cannot be serialized: it captures live executor state",
        ))
    }
}

/// Future returned by [`Lock::async_acquire`] and [`RLock::async_acquire`].
#[must_use = "futures do nothing unless polled"]
pub struct LockAcquireFuture<'a, 'b> {
    lock: &'a Lock,
    cx: &'b Cx,
    identity: Identity,
    count: usize,
    reentrant: bool,
    blocking: bool,
    shield: bool,
    waiter: Option<(Arc<WaitToken>, Arc<TaskEvent>)>,
}

impl LockAcquireFuture<'_, '_> {
    /// Ignores cancellation requests for the duration of the wait.
    #[must_use]
    pub fn shielded(mut self) -> Self {
        self.shield = true;
        self
    }
}

impl Future for LockAcquireFuture<'_, '_> {
    type Output = Result<bool, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if this.waiter.is_none() {
            if !this.shield && this.cx.checkpoint().is_err() {
                return Poll::Ready(Err(AcquireError::Cancelled));
            }
            let mut state = this.lock.state.lock();
            if state.owner == Some(this.identity) {
                if this.reentrant {
                    state.count += this.count;
                    return Poll::Ready(Ok(true));
                }
                return Poll::Ready(Err(AcquireError::Recursion));
            }
            if state.unlocked {
                state.unlocked = false;
                state.owner = Some(this.identity);
                state.count = this.count;
                return Poll::Ready(Ok(true));
            }
            if !this.blocking {
                return Poll::Ready(Ok(false));
            }
            let event = Arc::new(TaskEvent::new());
            let token = Arc::new(WaitToken::with_owner(
                Arc::clone(&event) as Arc<dyn Event>,
                this.identity,
                this.count,
            ));
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
                    // The handoff won the race: we own the lock, give it back.
                    this.lock.handoff_release();
                } else {
                    this.lock.state.lock().waiters.remove(&token);
                }
                Poll::Ready(Err(AcquireError::Cancelled))
            }
        }
    }
}

impl Drop for LockAcquireFuture<'_, '_> {
    fn drop(&mut self) {
        let Some((token, event)) = self.waiter.take() else {
            return;
        };
        if event.cancel() {
            self.lock.state.lock().waiters.remove(&token);
        } else if event.is_set() {
            // A handoff landed between the last poll and the drop.
            self.lock.handoff_release();
        }
    }
}

impl fmt::Debug for LockAcquireFuture<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockAcquireFuture")
            .field("identity", &self.identity)
            .field("count", &self.count)
            .field("reentrant", &self.reentrant)
            .field("parked", &self.waiter.is_some())
            .finish()
    }
}

/// A held lock, released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a Lock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.handoff_release();
    }
}

// ============================================================================
// RLock
// ============================================================================

/// A reentrant lock keyed on owner identity.
///
/// The owner may acquire again without blocking; each acquire adds to a
/// recursion counter and each release subtracts, with the lock handed off
/// only when the counter reaches zero.
#[derive(Debug, Default)]
pub struct RLock {
    inner: Lock,
}

impl RLock {
    /// Creates an unlocked reentrant lock.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Lock::new() }
    }

    /// Whether the lock is currently held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// The identity of the current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<Identity> {
        self.inner.owner()
    }

    /// The current recursion depth; zero when unlocked.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.state.lock().count
    }

    /// See [`Lock::waiting`].
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.waiting()
    }

    /// Whether the calling task owns the lock.
    #[must_use]
    pub fn async_owned(&self, cx: &Cx) -> bool {
        self.inner.async_owned(cx)
    }

    /// Whether the calling green executor owns the lock.
    #[must_use]
    pub fn green_owned(&self) -> bool {
        self.inner.green_owned()
    }

    /// Acquires `count` recursion levels from a cooperative task.
    ///
    /// If the task already owns the lock the levels are added without
    /// touching the queue; otherwise this behaves like a lock acquire that
    /// starts the counter at `count`.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn async_acquire<'a, 'b>(
        &'a self,
        cx: &'b Cx,
        count: usize,
        blocking: bool,
    ) -> LockAcquireFuture<'a, 'b> {
        assert!(count >= 1, "count must be >= 1");
        LockAcquireFuture {
            lock: &self.inner,
            cx,
            identity: cx.identity(),
            count,
            reentrant: true,
            blocking,
            shield: false,
            waiter: None,
        }
    }

    /// Acquires `count` recursion levels from a blocking caller.
    ///
    /// # Errors
    ///
    /// Never fails with [`AcquireError::Recursion`]; the variant is shared
    /// with [`Lock`].
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn green_acquire(
        &self,
        count: usize,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<bool, AcquireError> {
        assert!(count >= 1, "count must be >= 1");
        self.inner
            .green_acquire_as(current_green_identity(), count, true, blocking, timeout)
    }

    /// Releases `count` recursion levels from a cooperative task.
    ///
    /// # Errors
    ///
    /// Ownership errors as for [`Lock::async_release`], plus
    /// [`ReleaseError::Underflow`] when `count` exceeds the current
    /// recursion depth.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn async_release(&self, cx: &Cx, count: usize) -> Result<(), ReleaseError> {
        self.release_levels(cx.identity(), count)
    }

    /// Releases `count` recursion levels from a blocking caller.
    ///
    /// # Errors
    ///
    /// As for [`RLock::async_release`].
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn green_release(&self, count: usize) -> Result<(), ReleaseError> {
        self.release_levels(current_green_identity(), count)
    }

    fn release_levels(&self, identity: Identity, count: usize) -> Result<(), ReleaseError> {
        assert!(count >= 1, "count must be >= 1");
        let fully_released = {
            let mut state = self.inner.state.lock();
            match state.owner {
                None => return Err(ReleaseError::Unlocked),
                Some(owner) if owner != identity => return Err(ReleaseError::NotOwner),
                Some(_) => {}
            }
            if state.count < count {
                return Err(ReleaseError::Underflow);
            }
            state.count -= count;
            state.count == 0
        };
        if fully_released {
            self.inner.handoff_release();
        }
        Ok(())
    }

    /// Acquires one level and returns a guard releasing it on drop.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Cancelled`] if the task's cancellation
    /// request was observed while waiting.
    pub async fn async_lock(&self, cx: &Cx) -> Result<RLockGuard<'_>, AcquireError> {
        self.async_acquire(cx, 1, true).await?;
        Ok(RLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Blocking counterpart of [`RLock::async_lock`].
    ///
    /// # Errors
    ///
    /// Does not fail in practice; the signature matches [`Lock::green_lock`].
    pub fn green_lock(&self) -> Result<RLockGuard<'_>, AcquireError> {
        self.green_acquire(1, true, None)?;
        Ok(RLockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// See [`Lock::park`].
    pub fn park(&self, token: Arc<WaitToken>) {
        self.inner.park(token);
    }

    /// See [`Lock::unpark`].
    pub fn unpark(&self, token: &Arc<WaitToken>) -> bool {
        self.inner.unpark(token)
    }

    /// See [`Lock::after_park`].
    pub fn after_park(&self, identity: Identity, count: usize) {
        self.inner.after_park(identity, count);
    }
}

impl Serialize for RLock {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom(
            "RLock cannot be serialized: it captures live executor state",
        ))
    }
}

/// One held recursion level of an [`RLock`], released on drop.
#[must_use = "the level is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RLockGuard<'a> {
    lock: &'a RLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RLockGuard<'_> {
    fn drop(&mut self) {
        let fully_released = {
            let mut state = self.lock.inner.state.lock();
            state.count = state.count.saturating_sub(1);
            state.count == 0
        };
        if fully_released {
            self.lock.inner.handoff_release();
        }
    }
}

// ============================================================================
// Deprecated aliases
// ============================================================================

/// Historical alias of [`BinarySemaphore`](crate::semaphore::BinarySemaphore).
#[deprecated(note = "use `BinarySemaphore` instead")]
pub type PLock = crate::semaphore::BinarySemaphore;

/// Historical alias of
/// [`BoundedBinarySemaphore`](crate::semaphore::BoundedBinarySemaphore).
#[deprecated(note = "use `BoundedBinarySemaphore` instead")]
pub type BLock = crate::semaphore::BoundedBinarySemaphore;
