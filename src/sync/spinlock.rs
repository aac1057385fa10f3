//! Mutual exclusion that must be explicitly released.
//!
//! The guard returned by [`SpinLock::lock`] does not release the lock when
//! dropped; the caller must call [`SpinLockGuard::unlock`]. Dropping a guard
//! still holding the lock is a bug and panics immediately, rather than
//! silently papering over a forgotten release with an auto-drop. This is the
//! same shape as `keos::sync::{SpinLock, Mutex}`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Returned by `try_lock` when the lock is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock;

pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(t: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }

    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(SpinLockGuard { lock: self })
        } else {
            Err(WouldBlock)
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// RAII-shaped guard that must be released with [`unlock`](Self::unlock).
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T: Sync> Sync for SpinLockGuard<'_, T> {}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> SpinLockGuard<'_, T> {
    /// Releases the lock. Must be called explicitly.
    pub fn unlock(self) {
        let lock = self.lock;
        core::mem::forget(self);
        lock.locked.store(false, Ordering::Release);
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        panic!("SpinLockGuard dropped without calling `.unlock()`");
    }
}
