#![allow(missing_docs)]
//! End-to-end semaphore scenarios: real threads contending with polled
//! tasks on the same primitive.

mod common;

use common::{block_on, noop_waker, poll_once, wait_until, CountingWaker};
use duosync::test_logging::init_test_logging;
use duosync::{
    BinarySemaphore, BoundedBinarySemaphore, BoundedSemaphore, Cancelled, Cx, OverflowError,
    Semaphore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::task::Waker;
use std::time::Duration;

#[test]
fn two_immediate_acquires_then_third_parks() {
    init_test_logging();
    duosync::test_phase!("two_immediate_acquires_then_third_parks");
    let sem = Arc::new(Semaphore::new(2));

    assert!(sem.green_acquire(true, None));
    assert!(sem.green_acquire(true, None));
    assert_eq!(sem.value(), 0);

    let third = Arc::clone(&sem);
    let handle = std::thread::spawn(move || third.green_acquire(true, None));
    wait_until("third waiter to park", || sem.waiting() == 1);

    sem.release(1);
    assert!(handle.join().expect("third acquirer panicked"));

    duosync::assert_with_log!(sem.value() == 0, "value", 0usize, sem.value());
    duosync::assert_with_log!(sem.waiting() == 0, "waiting", 0usize, sem.waiting());
    duosync::test_complete!("two_immediate_acquires_then_third_parks");
}

#[test]
fn single_release_serves_the_older_waiter() {
    init_test_logging();
    duosync::test_phase!("single_release_serves_the_older_waiter");
    let sem = Arc::new(Semaphore::new(0));
    let (tx, rx) = mpsc::channel();

    let sem_a = Arc::clone(&sem);
    let tx_a = tx.clone();
    let first = std::thread::spawn(move || {
        assert!(sem_a.green_acquire(true, None));
        tx_a.send("first").expect("channel closed");
    });
    wait_until("first waiter to park", || sem.waiting() == 1);

    let sem_b = Arc::clone(&sem);
    let second = std::thread::spawn(move || {
        assert!(sem_b.green_acquire(true, None));
        tx.send("second").expect("channel closed");
    });
    wait_until("second waiter to park", || sem.waiting() == 2);

    sem.release(1);
    let served = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("no waiter was served");
    duosync::assert_with_log!(served == "first", "FIFO order", "first", served);
    assert!(rx.try_recv().is_err());
    assert_eq!(sem.waiting(), 1);

    sem.release(1);
    first.join().expect("first waiter panicked");
    second.join().expect("second waiter panicked");
    duosync::test_complete!("single_release_serves_the_older_waiter");
}

#[test]
fn green_waiter_is_served_before_later_task_waiter() {
    init_test_logging();
    duosync::test_phase!("green_waiter_is_served_before_later_task_waiter");
    let sem = Arc::new(Semaphore::new(0));

    let green = Arc::clone(&sem);
    let handle = std::thread::spawn(move || green.green_acquire(true, None));
    wait_until("green waiter to park", || sem.waiting() == 1);

    let cx = Cx::for_testing();
    let counting = CountingWaker::new();
    let waker = Waker::from(Arc::clone(&counting));
    let mut fut = sem.async_acquire(&cx, true);
    assert!(poll_once(&mut fut, &waker).is_none());
    assert_eq!(sem.waiting(), 2);

    // One unit: the green waiter enqueued first, so it wins.
    sem.release(1);
    assert!(handle.join().expect("green waiter panicked"));
    assert!(poll_once(&mut fut, &waker).is_none());

    sem.release(1);
    assert_eq!(poll_once(&mut fut, &waker), Some(Ok(true)));
    duosync::assert_with_log!(sem.value() == 0, "all handed off", 0usize, sem.value());
    duosync::test_complete!("green_waiter_is_served_before_later_task_waiter");
}

#[test]
fn no_permit_is_lost_under_contention() {
    init_test_logging();
    duosync::test_phase!("no_permit_is_lost_under_contention");
    const THREADS: usize = 8;
    const ITERS: usize = 200;
    const PERMITS: usize = 4;

    let sem = Arc::new(Semaphore::new(PERMITS));
    let in_flight = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let sem = Arc::clone(&sem);
            let in_flight = Arc::clone(&in_flight);
            std::thread::spawn(move || {
                for _ in 0..ITERS {
                    assert!(sem.green_acquire(true, None));
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    assert!(now <= PERMITS, "permit over-issued: {now} in flight");
                    std::thread::yield_now();
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    sem.release(1);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }

    duosync::assert_with_log!(sem.value() == PERMITS, "value restored", PERMITS, sem.value());
    duosync::assert_with_log!(sem.waiting() == 0, "queue drained", 0usize, sem.waiting());
    duosync::test_complete!("no_permit_is_lost_under_contention");
}

#[test]
fn cancelled_waiter_forwards_consumed_permit_to_next() {
    init_test_logging();
    duosync::test_phase!("cancelled_waiter_forwards_consumed_permit_to_next");
    let sem = Semaphore::new(0);
    let cx1 = Cx::for_testing();
    let cx2 = Cx::for_testing();
    let waker = noop_waker();

    let mut fut1 = sem.async_acquire(&cx1, true);
    let mut fut2 = sem.async_acquire(&cx2, true);
    assert!(poll_once(&mut fut1, &waker).is_none());
    assert!(poll_once(&mut fut2, &waker).is_none());

    // Handoff reaches the first waiter, which is then cancelled before it
    // can run: the permit must flow on to the second waiter.
    sem.release(1);
    cx1.set_cancel_requested(true);
    assert_eq!(poll_once(&mut fut1, &waker), Some(Err(Cancelled)));

    assert_eq!(poll_once(&mut fut2, &waker), Some(Ok(true)));
    duosync::assert_with_log!(sem.value() == 0, "no stray unit", 0usize, sem.value());
    duosync::assert_with_log!(sem.waiting() == 0, "queue drained", 0usize, sem.waiting());
    duosync::test_complete!("cancelled_waiter_forwards_consumed_permit_to_next");
}

#[test]
fn timed_out_waiter_does_not_absorb_later_release() {
    init_test_logging();
    let sem = Semaphore::new(0);
    assert!(!sem.green_acquire(true, Some(Duration::from_millis(10))));
    sem.release(1);
    assert_eq!(sem.value(), 1);
    assert!(sem.green_acquire(true, None));
}

#[test]
fn async_permit_guards_roundtrip_through_block_on() {
    init_test_logging();
    let cx = Cx::for_testing();
    let sem = Semaphore::new(1);

    let permit = block_on(sem.async_acquire_permit(&cx)).expect("acquire not cancelled");
    assert_eq!(sem.value(), 0);
    drop(permit);
    assert_eq!(sem.value(), 1);
}

#[test]
fn async_acquire_unblocks_when_thread_releases() {
    init_test_logging();
    duosync::test_phase!("async_acquire_unblocks_when_thread_releases");
    let sem = Arc::new(Semaphore::new(0));

    let releaser = Arc::clone(&sem);
    let handle = std::thread::spawn(move || {
        wait_until("task waiter to park", || releaser.waiting() == 1);
        releaser.release(1);
    });

    let cx = Cx::for_testing();
    let acquired = block_on(sem.async_acquire(&cx, true)).expect("acquire not cancelled");
    assert!(acquired);
    handle.join().expect("releaser panicked");
    duosync::assert_with_log!(sem.value() == 0, "handed off", 0usize, sem.value());
    duosync::test_complete!("async_acquire_unblocks_when_thread_releases");
}

#[test]
fn bounded_drain_and_refill_roundtrips() {
    init_test_logging();
    duosync::test_phase!("bounded_drain_and_refill_roundtrips");
    let sem = BoundedSemaphore::with_max(3);
    assert_eq!(sem.value(), 3);

    for _ in 0..3 {
        assert!(sem.green_acquire(true, None));
    }
    assert_eq!(sem.value(), 0);
    for _ in 0..3 {
        assert!(sem.release(1).is_ok());
    }
    assert_eq!(sem.value(), 3);

    assert_eq!(sem.release(1), Err(OverflowError));
    duosync::assert_with_log!(sem.value() == 3, "value unchanged", 3usize, sem.value());
    duosync::test_complete!("bounded_drain_and_refill_roundtrips");
}

#[test]
fn binary_release_is_honored_unit_by_unit() {
    init_test_logging();
    let sem = BinarySemaphore::locked();
    assert!(sem.is_locked());
    sem.release(1);
    assert!(!sem.is_locked());
    // The unbounded binary form tolerates an uncontested over-release.
    sem.release(1);
    assert_eq!(sem.value(), 2);
}

#[test]
fn bounded_binary_rejects_release_when_unlocked() {
    init_test_logging();
    let sem = BoundedBinarySemaphore::new();
    assert!(sem.try_acquire());
    assert!(sem.release(1).is_ok());
    assert_eq!(sem.release(1), Err(OverflowError));
    assert_eq!(sem.value(), 1);
}

#[test]
fn semaphores_refuse_serialization() {
    init_test_logging();
    duosync::test_phase!("semaphores_refuse_serialization");
    assert!(serde_json::to_string(&Semaphore::new(1)).is_err());
    assert!(serde_json::to_string(&BoundedSemaphore::new(1, 2)).is_err());
    assert!(serde_json::to_string(&BinarySemaphore::new()).is_err());
    assert!(serde_json::to_string(&BoundedBinarySemaphore::new()).is_err());
    duosync::test_complete!("semaphores_refuse_serialization");
}
