//! The two external collaborators every barrier algorithm in this crate spins against: a
//! CPU-pause hint, and (for the combining tree's one-time topology construction only) a
//! test-and-set spinlock.
//!
//! Neither of these is part of the barrier algorithms themselves -- the algorithms only need
//! *some* way to back off while spinning, and the combining tree only needs *some* way to
//! serialize tree construction. Both are kept as small, self-contained pieces so the rest of
//! the crate can treat them as a fixed contract.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// Gives the spinning CPU a hint that it is in a busy-wait loop, backing off exponentially the
/// longer the loop runs.
///
/// Thin wrapper around [`parking_lot_core::SpinWait`], which is what `hurdles`'s original
/// centralized barrier already used for its one spin loop.
#[derive(Default)]
pub(crate) struct Stall(parking_lot_core::SpinWait);

impl Stall {
    /// Start a new backoff sequence.
    #[inline]
    pub(crate) fn new() -> Self {
        Stall(parking_lot_core::SpinWait::new())
    }

    /// Spin once, backing off a little more than the last call.
    #[inline]
    pub(crate) fn spin(&mut self) {
        self.0.spin();
    }
}

/// A simple test-and-set spinlock.
///
/// Used by [`crate::combining`] to serialize the one-time BFS that attaches a newly registered
/// group to the tree; every barrier's `wait` path is lock-free and never touches this type.
pub(crate) struct TestAndSetLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is only ever granted through a `TestAndSetLockGuard`, which is only
// ever handed out while `locked` is held.
unsafe impl<T: ?Sized + Send> Send for TestAndSetLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for TestAndSetLock<T> {}

impl<T> TestAndSetLock<T> {
    /// Create a new, unlocked spinlock guarding `data`.
    pub(crate) fn new(data: T) -> Self {
        TestAndSetLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, spinning until it is free.
    pub(crate) fn lock(&self) -> TestAndSetLockGuard<'_, T> {
        let mut stall = Stall::new();
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                stall.spin();
            }
        }
        TestAndSetLockGuard { lock: self }
    }
}

pub(crate) struct TestAndSetLockGuard<'a, T: ?Sized> {
    lock: &'a TestAndSetLock<T>,
}

impl<T: ?Sized> Deref for TestAndSetLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for TestAndSetLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for TestAndSetLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_excludes() {
        let lock = TestAndSetLock::new(0usize);
        {
            let mut guard = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }
}
