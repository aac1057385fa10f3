//! Synchronisation primitives used by the filesystem and VM layers.
//!
//! Kept deliberately small: a [`SpinLock`] for short, explicitly-released
//! critical sections (`filesys_lock`, `vm_lock`, per-inode locks) and an
//! [`RwLock`] for the open-inode cache, where many readers are the common
//! case.

mod rwlock;
mod spinlock;

pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
