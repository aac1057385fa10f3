//! Reader-writer lock whose guards release normally on drop.
//!
//! Unlike [`super::spinlock::SpinLock`], an `RwLock` guard is an ordinary
//! RAII value: letting it go out of scope releases the lock. This mirrors
//! the split in `keos::sync` between the explicit-unlock `Mutex`/`SpinLock`
//! and the drop-released `RwLock`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

const WRITER: usize = 1 << (usize::BITS - 1);

pub struct RwLock<T> {
    // Top bit: a writer holds the lock. Remaining bits: reader count.
    state: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

impl<T> RwLock<T> {
    pub const fn new(t: T) -> Self {
        Self {
            state: AtomicUsize::new(0),
            data: UnsafeCell::new(t),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        loop {
            let cur = self.state.load(Ordering::Relaxed);
            if cur & WRITER != 0 {
                core::hint::spin_loop();
                continue;
            }
            if self
                .state
                .compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return RwLockReadGuard { lock: self };
            }
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        loop {
            if self
                .state
                .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return RwLockWriteGuard { lock: self };
            }
            core::hint::spin_loop();
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<'a, T> RwLockReadGuard<'a, T> {
    /// Upgrades a read guard into a write guard. Releases the shared hold
    /// and spins until exclusive access is granted, so another upgrader (or
    /// a plain writer) may run in between.
    pub fn upgrade(self) -> RwLockWriteGuard<'a, T> {
        let lock = self.lock;
        core::mem::forget(self);
        lock.state.fetch_sub(1, Ordering::Release);
        lock.write()
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}
