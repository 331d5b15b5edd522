//! Executor identity.
//!
//! Lock ownership and reentrancy need a stable name for "whoever is running
//! right now": an OS thread, a green thread hosted on one, or a cooperative
//! task. [`Identity`] is that name: a `(kind, id)` pair that is unique
//! across live executors and constant for the lifetime of each one.
//!
//! Thread identities are allocated lazily from a process-wide counter and
//! cached in a thread-local. Green identities are installed by the hosting
//! runtime with [`enter_green_scope`] and fall back to the thread identity
//! when no scope is active. Task identities come from the task's
//! [`Cx`](crate::cx::Cx).

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The scheduling world an executor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorKind {
    /// An OS thread blocking on native primitives.
    Thread,
    /// A green thread multiplexed onto OS threads by a hosting runtime.
    Green,
    /// A cooperative task driven by polling.
    Task,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Thread => "thread",
            Self::Green => "green",
            Self::Task => "task",
        })
    }
}

/// A stable identifier for an executor.
///
/// Two distinct live executors always compare unequal; the same executor
/// yields the same identity for every call while it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    kind: ExecutorKind,
    id: u64,
}

impl Identity {
    /// Creates an identity from its parts.
    #[must_use]
    pub const fn new(kind: ExecutorKind, id: u64) -> Self {
        Self { kind, id }
    }

    /// The scheduling world this identity belongs to.
    #[must_use]
    pub const fn kind(&self) -> ExecutorKind {
        self.kind
    }

    /// The executor's id within its world.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    static GREEN_ID: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Identity of the calling OS thread.
#[must_use]
pub fn current_thread_identity() -> Identity {
    Identity::new(ExecutorKind::Thread, THREAD_ID.with(|id| *id))
}

/// Identity of the calling green executor.
///
/// Returns the identity installed by the innermost [`enter_green_scope`],
/// or the OS thread identity when no green scope is active.
#[must_use]
pub fn current_green_identity() -> Identity {
    match GREEN_ID.with(Cell::get) {
        Some(id) => Identity::new(ExecutorKind::Green, id),
        None => current_thread_identity(),
    }
}

/// Installs a green-thread identity for the current OS thread.
///
/// Hosting runtimes call this when switching a green thread onto the
/// current OS thread. Scopes nest; dropping the guard restores the
/// previously installed identity (or the plain thread identity).
#[must_use]
pub fn enter_green_scope(id: u64) -> GreenScope {
    let previous = GREEN_ID.with(|slot| slot.replace(Some(id)));
    GreenScope { previous }
}

/// Guard returned by [`enter_green_scope`]; restores the outer scope on drop.
#[derive(Debug)]
pub struct GreenScope {
    previous: Option<u64>,
}

impl Drop for GreenScope {
    fn drop(&mut self) {
        GREEN_ID.with(|slot| slot.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_identity_is_stable() {
        let first = current_thread_identity();
        let second = current_thread_identity();
        assert_eq!(first, second);
        assert_eq!(first.kind(), ExecutorKind::Thread);
    }

    #[test]
    fn thread_identities_are_distinct_across_threads() {
        let here = current_thread_identity();
        let there = std::thread::spawn(current_thread_identity)
            .join()
            .expect("thread join failed");
        assert_ne!(here, there);
    }

    #[test]
    fn green_identity_falls_back_to_thread() {
        assert_eq!(current_green_identity(), current_thread_identity());
    }

    #[test]
    fn green_scopes_nest_and_restore() {
        let outer = enter_green_scope(7);
        assert_eq!(
            current_green_identity(),
            Identity::new(ExecutorKind::Green, 7)
        );
        {
            let _inner = enter_green_scope(8);
            assert_eq!(
                current_green_identity(),
                Identity::new(ExecutorKind::Green, 8)
            );
        }
        assert_eq!(
            current_green_identity(),
            Identity::new(ExecutorKind::Green, 7)
        );
        drop(outer);
        assert_eq!(current_green_identity(), current_thread_identity());
    }

    #[test]
    fn display_includes_kind_and_id() {
        let identity = Identity::new(ExecutorKind::Task, 42);
        assert_eq!(identity.to_string(), "task:42");
    }
}
