//! Waiter tokens and the FIFO wait queue.

use crate::config;
use crate::event::Event;
use crate::identity::Identity;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A parked waiter.
///
/// Carries the waiter's wakeup event, the identity that will own the
/// primitive after a handoff (locks only), and the count transferred along
/// with the handoff (the recursion depth for a reentrant lock, one permit
/// otherwise). Created immediately before enqueue; unlinked by whichever of
/// the releaser and the waiter reaches it first; dropped when the last
/// reference goes away.
pub struct WaitToken {
    event: Arc<dyn Event>,
    owner: Option<Identity>,
    count: usize,
}

impl WaitToken {
    /// Token for a plain permit waiter.
    #[must_use]
    pub fn new(event: Arc<dyn Event>) -> Self {
        Self {
            event,
            owner: None,
            count: 1,
        }
    }

    /// Token for a would-be lock owner.
    #[must_use]
    pub fn with_owner(event: Arc<dyn Event>, owner: Identity, count: usize) -> Self {
        Self {
            event,
            owner: Some(owner),
            count,
        }
    }

    /// The waiter's wakeup event.
    #[must_use]
    pub fn event(&self) -> &dyn Event {
        &*self.event
    }

    /// The identity that will own the primitive after a handoff.
    #[must_use]
    pub fn owner(&self) -> Option<Identity> {
        self.owner
    }

    /// The count transferred on handoff.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

impl fmt::Debug for WaitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitToken")
            .field("event", &self.event)
            .field("owner", &self.owner)
            .field("count", &self.count)
            .finish()
    }
}

/// FIFO queue of parked tokens.
///
/// The queue has no lock of its own: every mutation happens under the
/// owning primitive's mutex, in the same critical section as the counter
/// updates it orders against. FIFO handoff among uncancelled tokens is the
/// sole fairness mechanism; there are no priorities and no reordering.
pub(crate) struct WaitQueue {
    tokens: VecDeque<Arc<WaitToken>>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self {
            tokens: VecDeque::with_capacity(config::WAITER_QUEUE_CAPACITY),
        }
    }

    /// Appends a token at the tail.
    pub(crate) fn enqueue(&mut self, token: Arc<WaitToken>) {
        self.tokens.push_back(token);
    }

    /// Removes and returns the oldest token whose event is still claimable.
    ///
    /// Stale cancelled tokens scanned past on the way are dropped, so the
    /// cost is amortized O(1).
    pub(crate) fn dequeue_head(&mut self) -> Option<Arc<WaitToken>> {
        while let Some(token) = self.tokens.pop_front() {
            if !token.event().is_cancelled() {
                return Some(token);
            }
        }
        None
    }

    /// Best-effort unlink by pointer identity.
    ///
    /// A no-op when the token was already dequeued by a releaser.
    pub(crate) fn remove(&mut self, token: &Arc<WaitToken>) {
        if let Some(pos) = self.tokens.iter().position(|t| Arc::ptr_eq(t, token)) {
            self.tokens.remove(pos);
        }
    }

    /// Number of queued tokens, including not-yet-reaped cancellations.
    pub(crate) fn len(&self) -> usize {
        self.tokens.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("len", &self.tokens.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TaskEvent;

    fn token() -> Arc<WaitToken> {
        Arc::new(WaitToken::new(Arc::new(TaskEvent::new())))
    }

    #[test]
    fn dequeue_preserves_fifo_order() {
        let mut queue = WaitQueue::new();
        let first = token();
        let second = token();
        queue.enqueue(Arc::clone(&first));
        queue.enqueue(Arc::clone(&second));

        let head = queue.dequeue_head().expect("queue has tokens");
        assert!(Arc::ptr_eq(&head, &first));
        let next = queue.dequeue_head().expect("queue has tokens");
        assert!(Arc::ptr_eq(&next, &second));
        assert!(queue.dequeue_head().is_none());
    }

    #[test]
    fn dequeue_skips_cancelled_tokens() {
        let mut queue = WaitQueue::new();
        let stale = token();
        let live = token();
        queue.enqueue(Arc::clone(&stale));
        queue.enqueue(Arc::clone(&live));
        assert!(stale.event().cancel());

        let head = queue.dequeue_head().expect("live token remains");
        assert!(Arc::ptr_eq(&head, &live));
        // The stale token was reaped along the way.
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_unlinks_by_pointer_identity() {
        let mut queue = WaitQueue::new();
        let first = token();
        let second = token();
        queue.enqueue(Arc::clone(&first));
        queue.enqueue(Arc::clone(&second));

        queue.remove(&first);
        assert_eq!(queue.len(), 1);
        // Removing again is a no-op.
        queue.remove(&first);
        assert_eq!(queue.len(), 1);

        let head = queue.dequeue_head().expect("second token remains");
        assert!(Arc::ptr_eq(&head, &second));
    }
}
