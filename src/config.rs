//! Deployment constants.
//!
//! Everything here is resolved once per process and stays fixed afterwards,
//! so two primitives can never disagree about the fairness regime.

use std::sync::OnceLock;

/// Initial capacity preallocated for each primitive's waiter queue.
pub(crate) const WAITER_QUEUE_CAPACITY: usize = 4;

/// Whether acquire fast paths inspect the waiter queue before claiming.
///
/// In strict-fairness mode (the default) the fast path refuses to claim a
/// permit while any waiter is queued, so a late arriver cannot slip past
/// parked waiters. Setting `DUOSYNC_PERFECT_FAIRNESS=0` (or `false`/`off`)
/// skips the inspection and tolerates micro-barging in the racy window
/// where the queue briefly appears empty.
///
/// The environment variable is read once, on first use.
#[must_use]
pub fn perfect_fairness() -> bool {
    static FLAG: OnceLock<bool> = OnceLock::new();
    *FLAG.get_or_init(|| {
        std::env::var("DUOSYNC_PERFECT_FAIRNESS")
            .map(|raw| !matches!(raw.trim(), "0" | "false" | "off"))
            .unwrap_or(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_fairness_is_stable() {
        // Whatever the environment says, repeated reads agree.
        let first = perfect_fairness();
        assert_eq!(first, perfect_fairness());
    }
}
