//! A counter-based linear barrier, as described in "3.1 Centralized Barriers" in Mellor-Crummey
//! and Scott's paper [Algorithms for scalable synchronization on shared-memory
//! multiprocessors][1].
//!
//! This is the simplest of the five barriers in this crate: every thread hits the same shared
//! counter, so it scales the worst under contention, but it also has the lowest fixed overhead,
//! which makes it the right choice for small thread counts.
//!
//! [1]: https://dl.acm.org/citation.cfm?doid=103727.103729

use std::sync::{atomic, Arc};

use crate::spin::Stall;
use crate::ThreadBarrier;

struct Inner {
    sense: atomic::AtomicBool,
    count: atomic::AtomicUsize,
    total: usize,
}

/// A barrier which enables multiple threads to synchronize the beginning of some computation.
///
/// `CentralizedBarrier` is `Clone`, and should *not* be wrapped in an `Arc` -- cloning it gives
/// each thread its own handle onto the same shared counter and sense flag.
pub struct CentralizedBarrier {
    inner: Arc<Inner>,
    sense: bool,
    used: bool,
}

/// Returned by [`CentralizedBarrier::wait`] when all threads in the barrier have rendezvoused.
pub struct BarrierWaitResult(bool);

impl CentralizedBarrier {
    /// Creates a new barrier that will block until `n` threads have called [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `n == 0` -- a barrier for zero threads can never have a last
    /// arrival and would deadlock every participant.
    pub fn new(n: usize) -> Self {
        debug_assert!(n > 0, "a barrier for 0 threads can never release");
        CentralizedBarrier {
            used: false,
            sense: false,
            inner: Arc::new(Inner {
                sense: atomic::AtomicBool::new(false),
                count: atomic::AtomicUsize::new(0),
                total: n,
            }),
        }
    }

    /// Blocks the current thread until all threads have rendezvoused at this episode.
    ///
    /// Barriers are reusable: once all threads have rendezvoused once, the same barrier is
    /// immediately ready for the next episode with no separate reset step.
    ///
    /// A single (arbitrary) thread receives a [`BarrierWaitResult`] whose [`is_leader`] returns
    /// `true`; every other thread gets `false`.
    ///
    /// [`is_leader`]: BarrierWaitResult::is_leader
    pub fn wait(&mut self) -> BarrierWaitResult {
        self.used = true;
        self.sense = !self.sense;
        let s = self.sense;

        let prior = self.inner.count.fetch_add(1, atomic::Ordering::AcqRel);
        if prior == self.inner.total - 1 {
            // last arrival: reset the counter, then release everyone else
            self.inner.count.store(0, atomic::Ordering::Relaxed);
            self.inner.sense.store(s, atomic::Ordering::Release);
            BarrierWaitResult(true)
        } else {
            let mut stall = Stall::new();
            while self.inner.sense.load(atomic::Ordering::Acquire) != s {
                stall.spin();
            }
            BarrierWaitResult(false)
        }
    }
}

impl Clone for CentralizedBarrier {
    /// Produce a new handle to the same shared barrier, for use by another thread.
    ///
    /// # Panics
    ///
    /// Panics if this handle has already been used to `wait` -- at that point its `sense` no
    /// longer reflects the barrier's initial state, so a fresh clone would be out of sync.
    fn clone(&self) -> Self {
        assert!(!self.used, "cannot clone a CentralizedBarrier after wait()");
        CentralizedBarrier {
            used: false,
            sense: self.sense,
            inner: self.inner.clone(),
        }
    }
}

impl BarrierWaitResult {
    /// Returns whether this thread's [`wait`](CentralizedBarrier::wait) call was the one that
    /// released the barrier.
    ///
    /// Exactly one thread per episode receives `true`.
    pub fn is_leader(&self) -> bool {
        self.0
    }
}

impl ThreadBarrier for CentralizedBarrier {
    fn wait(&mut self) {
        CentralizedBarrier::wait(self);
    }
}
