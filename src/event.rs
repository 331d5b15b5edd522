//! One-shot wakeup latches bridging blocking and cooperative waiters.
//!
//! An [`Event`] is owned by exactly one waiter and set by exactly one other
//! party. Its three states (unset, set, cancelled) admit two claiming
//! transitions: [`Event::set`] (a releaser handing something off) and
//! [`Event::cancel`] (the waiter abandoning the wait). The two race for a
//! single claim; exactly one of them ever returns `true`, which is what
//! resolves the cancellation-versus-handoff race everywhere above this
//! module.
//!
//! Two implementations ship with the crate: [`ThreadEvent`] parks the
//! calling OS thread and [`TaskEvent`] suspends a polled task. A primitive's
//! wait queue holds them behind `Arc<dyn Event>` and never needs to know
//! which world a waiter came from.

use crate::cx::Cx;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

const UNSET: u8 = 0;
const SET: u8 = 1;
const CANCELLED: u8 = 2;

fn state_name(state: u8) -> &'static str {
    match state {
        SET => "set",
        CANCELLED => "cancelled",
        _ => "unset",
    }
}

/// A single-shot wakeup latch.
///
/// `set` and `cancel` contend for the same claim: whichever transitions the
/// event out of the unset state returns `true`, every later call returns
/// `false` and changes nothing. Events are single-shot; reuse after a claim
/// is not supported.
pub trait Event: Send + Sync + fmt::Debug {
    /// Transitions unset → set and wakes the waiter.
    ///
    /// Returns `true` iff this call performed the transition.
    fn set(&self) -> bool;

    /// Transitions unset → cancelled.
    ///
    /// Returns `true` iff this call performed the transition.
    fn cancel(&self) -> bool;

    /// Whether the event has been set.
    fn is_set(&self) -> bool;

    /// Whether the event has been cancelled.
    fn is_cancelled(&self) -> bool;
}

/// Outcome of a cooperative event wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The event was set; the wake carries whatever was handed off.
    Set,
    /// The wait observed a cancellation request. `consumed` is true when a
    /// concurrent `set` won the claim first, i.e. the caller now holds a
    /// handoff it must give back before propagating the cancellation.
    Cancelled {
        /// Whether a handoff landed before the cancellation was observed.
        consumed: bool,
    },
}

// ============================================================================
// ThreadEvent
// ============================================================================

/// Event for waiters that block the calling OS thread.
pub struct ThreadEvent {
    state: Mutex<u8>,
    cond: Condvar,
}

impl ThreadEvent {
    /// Creates an unset event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UNSET),
            cond: Condvar::new(),
        }
    }

    /// Blocks the calling thread until the event is claimed.
    ///
    /// Returns `true` iff the event was set. With a timeout, an expired wait
    /// claims the cancel transition itself; if a concurrent `set` already
    /// won, the handoff stands and `wait` returns `true`.
    #[must_use]
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock();
        match timeout {
            None => {
                while *state == UNSET {
                    self.cond.wait(&mut state);
                }
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while *state == UNSET {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        if *state == UNSET {
                            *state = CANCELLED;
                        }
                        break;
                    }
                }
            }
        }
        *state == SET
    }
}

impl Default for ThreadEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Event for ThreadEvent {
    fn set(&self) -> bool {
        let mut state = self.state.lock();
        if *state != UNSET {
            return false;
        }
        *state = SET;
        drop(state);
        self.cond.notify_one();
        true
    }

    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if *state != UNSET {
            return false;
        }
        *state = CANCELLED;
        drop(state);
        self.cond.notify_one();
        true
    }

    fn is_set(&self) -> bool {
        *self.state.lock() == SET
    }

    fn is_cancelled(&self) -> bool {
        *self.state.lock() == CANCELLED
    }
}

impl fmt::Debug for ThreadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadEvent")
            .field("state", &state_name(*self.state.lock()))
            .finish()
    }
}

// ============================================================================
// TaskEvent
// ============================================================================

/// Event for waiters that suspend a cooperative task.
///
/// The waiting side polls (via [`TaskEvent::wait`] or
/// [`TaskEvent::poll_wait`]); the setting side CASes the state and wakes the
/// stored waker. Unless shielded, every poll observes the task's
/// cancellation flag and resolves the cancel-versus-set race through the
/// event state.
pub struct TaskEvent {
    state: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl TaskEvent {
    /// Creates an unset event.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(UNSET),
            waker: Mutex::new(None),
        }
    }

    /// Returns a future resolving when the event is claimed.
    ///
    /// With `shield` set, cancellation requests on `cx` are ignored for the
    /// duration of this wait; the caller is still responsible for honoring
    /// them afterwards.
    #[must_use]
    pub fn wait<'a, 'b>(&'a self, cx: &'b Cx, shield: bool) -> TaskEventWait<'a, 'b> {
        TaskEventWait {
            event: self,
            cx,
            shield,
        }
    }

    /// A single wait step, for futures that embed the event themselves.
    ///
    /// Registers `waker` when the event is still unset. Returns
    /// [`WaitOutcome::Cancelled`] as soon as a cancellation request is
    /// observed (unless `shield` is set), with `consumed: true` when a
    /// concurrent set beat the cancellation to the claim.
    pub fn poll_wait(&self, cx: &Cx, shield: bool, waker: &Waker) -> Poll<WaitOutcome> {
        if !shield && cx.is_cancel_requested() {
            if self.cancel() {
                return Poll::Ready(WaitOutcome::Cancelled { consumed: false });
            }
            let consumed = self.state.load(Ordering::Acquire) == SET;
            return Poll::Ready(WaitOutcome::Cancelled { consumed });
        }

        match self.state.load(Ordering::Acquire) {
            SET => return Poll::Ready(WaitOutcome::Set),
            CANCELLED => return Poll::Ready(WaitOutcome::Cancelled { consumed: false }),
            _ => {}
        }

        {
            let mut slot = self.waker.lock();
            match slot.as_mut() {
                Some(existing) if existing.will_wake(waker) => {}
                _ => *slot = Some(waker.clone()),
            }
        }

        // A set may have raced in before the waker was stored.
        match self.state.load(Ordering::Acquire) {
            SET => Poll::Ready(WaitOutcome::Set),
            CANCELLED => Poll::Ready(WaitOutcome::Cancelled { consumed: false }),
            _ => Poll::Pending,
        }
    }
}

impl Default for TaskEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Event for TaskEvent {
    fn set(&self) -> bool {
        if self
            .state
            .compare_exchange(UNSET, SET, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let waker = self.waker.lock().take();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    fn cancel(&self) -> bool {
        self.state
            .compare_exchange(UNSET, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

impl fmt::Debug for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEvent")
            .field("state", &state_name(self.state.load(Ordering::Acquire)))
            .finish()
    }
}

/// Future returned by [`TaskEvent::wait`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct TaskEventWait<'a, 'b> {
    event: &'a TaskEvent,
    cx: &'b Cx,
    shield: bool,
}

impl Future for TaskEventWait<'_, '_> {
    type Output = WaitOutcome;

    fn poll(self: Pin<&mut Self>, task_cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.event.poll_wait(self.cx, self.shield, task_cx.waker())
    }
}
